pub mod alert;
pub mod animal;
pub mod device;
pub mod message;
pub mod position;
pub mod reading;
