#![doc = include_str!("../README.md")]

mod client;
mod device;
mod registry;
mod sensors;

pub use client::DeviceClient;
pub use device::{Device, RawDeviceRecord};
pub use registry::{
    Classified, DEFAULT_IGNORE_LIST, DeviceRegistry, ModelInfo, default_model_table,
};
pub use sensors::DeviceSensor;
