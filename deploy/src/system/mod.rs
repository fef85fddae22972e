//! 链接进本进程的函数。

#[cfg(any(use_cpu, test))]
pub mod common_cpu;

use crate::{module::Module, symbol_not_found, Error, Function};
use log::info;
use std::{collections::HashMap, sync::Arc};

/// 系统库：不经磁盘加载、直接链接进应用的函数表。
///
/// 系统库是一个普通的值，由使用者构造和持有，不存在进程级的全局注册表。
#[derive(Clone, Default)]
pub struct SystemLib(HashMap<String, Arc<dyn Function>>);

impl SystemLib {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置的 CPU 函数。
    #[cfg(any(use_cpu, test))]
    pub fn with_builtins() -> Self {
        common_cpu::builtins()
            .into_iter()
            .fold(Self::new(), |lib, f| lib.register(f))
    }

    /// 以函数自身的名字注册，同名函数会被替换。
    pub fn register(mut self, f: impl Function + 'static) -> Self {
        self.0.insert(f.name().into(), Arc::new(f));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按名字排序的全部函数名。
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.0.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

impl Module for SystemLib {
    fn get_function(&self, name: &str) -> Result<Box<dyn Function + '_>, Error> {
        match self.0.get(name) {
            Some(f) => {
                info!("resolved {name} from system lib");
                Ok(Box::new(f.clone()))
            }
            None => Err(symbol_not_found(format!("{name} in system lib"))),
        }
    }

    #[inline]
    fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}
