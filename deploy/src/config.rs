use crate::{ArgSpec, Signature};
use dlpack::{DataType, Device};

/// 默认加载的动态库。
pub const DEFAULT_ARTIFACT: &str = "lib/test_dll.so";

/// 一次调用的参数规格。
///
/// 所有张量形状均为 `(rows, rows)`，前 `inputs` 个是输入，最后一个是输出。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HarnessConfig {
    pub function: String,
    pub rows: usize,
    pub inputs: usize,
    pub dt: DataType,
    pub device: Device,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            function: "matmul_add_dyn".into(),
            rows: 64,
            inputs: 3,
            dt: DataType::F32,
            device: Device::cpu(0),
        }
    }
}

impl HarnessConfig {
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.rows]
    }

    /// 调用方期望的位置参数约定，包括末尾的输出。
    pub fn signature(&self) -> Signature {
        Signature::uniform(self.inputs + 1, ArgSpec::new(self.dt, 2))
    }
}

#[test]
fn test_default() {
    let config = HarnessConfig::default();
    assert_eq!(config.shape(), [64, 64]);
    assert_eq!(
        config.signature().to_string(),
        "(float32[2d], float32[2d], float32[2d], float32[2d])"
    );
}
