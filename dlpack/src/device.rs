use std::{fmt, str::FromStr};

/// 设备类型，取值与 `DLDeviceType` 一致。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(i32)]
pub enum DeviceType {
    Cpu = 1,
    Cuda = 2,
    CudaHost = 3,
    OpenCL = 4,
    Vulkan = 7,
    Metal = 8,
    Vpi = 9,
    Rocm = 10,
    RocmHost = 11,
    ExtDev = 12,
    CudaManaged = 13,
    OneApi = 14,
    WebGpu = 15,
    Hexagon = 16,
}

const NAMES: &[(DeviceType, &str)] = &[
    (DeviceType::Cpu, "cpu"),
    (DeviceType::Cuda, "cuda"),
    (DeviceType::CudaHost, "cuda_host"),
    (DeviceType::OpenCL, "opencl"),
    (DeviceType::Vulkan, "vulkan"),
    (DeviceType::Metal, "metal"),
    (DeviceType::Vpi, "vpi"),
    (DeviceType::Rocm, "rocm"),
    (DeviceType::RocmHost, "rocm_host"),
    (DeviceType::ExtDev, "ext_dev"),
    (DeviceType::CudaManaged, "cuda_managed"),
    (DeviceType::OneApi, "oneapi"),
    (DeviceType::WebGpu, "webgpu"),
    (DeviceType::Hexagon, "hexagon"),
];

impl DeviceType {
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(ty, _)| *ty == self)
            .map_or("unknown", |(_, name)| name)
    }
}

/// 设备描述，与 `DLDevice` 二进制兼容。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(C)]
pub struct Device {
    pub ty: DeviceType,
    pub id: i32,
}

impl Device {
    #[inline]
    pub const fn new(ty: DeviceType, id: i32) -> Self {
        Self { ty, id }
    }

    #[inline]
    pub const fn cpu(id: i32) -> Self {
        Self::new(DeviceType::Cpu, id)
    }

    #[inline]
    pub const fn cuda(id: i32) -> Self {
        Self::new(DeviceType::Cuda, id)
    }
}

impl fmt::Display for DeviceType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Device {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.id)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParseDeviceError(pub String);

impl fmt::Display for ParseDeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid device \"{}\"", self.0)
    }
}

impl std::error::Error for ParseDeviceError {}

impl FromStr for DeviceType {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(ty, _)| *ty)
            .ok_or_else(|| ParseDeviceError(s.into()))
    }
}

/// 接受 `cpu` 或 `cuda:1` 形式，省略序号时为 0。
impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = match s.split_once(':') {
            Some((ty, id)) => (
                ty,
                id.parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .ok_or_else(|| ParseDeviceError(s.into()))?,
            ),
            None => (s, 0),
        };
        let ty = ty.parse().map_err(|_| ParseDeviceError(s.into()))?;
        Ok(Self { ty, id })
    }
}

#[test]
fn test_device_str() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu(0));
    assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::cuda(1));
    assert_eq!(Device::new(DeviceType::OpenCL, 2).to_string(), "opencl:2");
    assert!("tpu:0".parse::<Device>().is_err());
    assert!("cpu:-1".parse::<Device>().is_err());
    assert!("cpu:x".parse::<Device>().is_err());
}
