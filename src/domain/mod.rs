pub mod gestures;
pub mod models;
pub mod settings;
pub mod toggle;
