#![deny(warnings)]

mod data;
mod device;
mod tensor;

pub use data::{DataType, DataTypeCode, ParseDataTypeError};
pub use device::{Device, DeviceType, ParseDeviceError};
pub use tensor::{DLTensor, TensorLayout};
