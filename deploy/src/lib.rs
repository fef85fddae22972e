//! 张量函数调用驱动。
//!
//! 从动态库或系统库中按名字解析函数，在主存上分配并填充参数张量，
//! 调用函数并输出结果，可选地在命名区间内收集性能指标。

mod alloc;
mod common;
mod config;
mod function;
mod harness;
mod tensor;

pub mod module;
pub mod profiling;
pub mod system;

pub use alloc::{Alloc, HostAlloc, ALLOC_ALIGNMENT};
pub use common::*;
pub use config::{HarnessConfig, DEFAULT_ARTIFACT};
pub use function::{ArgSpec, Function, Signature};
pub use harness::{Harness, RunSummary, VERIFY_ABS, VERIFY_REL};
pub use tensor::{Arg, Element, Tensor};

pub extern crate dlpack;

#[cfg(any(use_cpu, test))]
use tensor::shape_distinct;
