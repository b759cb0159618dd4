pub mod weather;

pub use weather::register_weather_tools;
