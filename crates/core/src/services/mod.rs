pub mod alert_service;
pub mod market_data_service;
pub mod portfolio_service;
pub mod screen_service;
pub mod settings_service;
