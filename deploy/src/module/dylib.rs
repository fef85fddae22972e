use super::{
    packed::{PackedCFunc, PackedFunc},
    Module,
};
use crate::{load_failed, symbol_not_found, Error, Function};
use libloading::{Library, Symbol};
use log::{debug, info};
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

const SYMBOL_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(n) => n,
    None => unreachable!(),
};

/// 从磁盘加载的动态库模块。
///
/// 导出的函数遵循打包调用约定（见 [PackedCFunc]）。动态符号无法内省参数约定，
/// 解析出的函数不声明 [Signature](crate::Signature)。
pub struct DylibModule {
    path: PathBuf,
    lib: Arc<Library>,
    symbols: Mutex<LruCache<String, PackedCFunc>>,
}

impl DylibModule {
    /// 加载 `path` 处的动态库。路径不存在或不是当前平台可加载的库时返回
    /// [LoadFailed](crate::ErrorKind::LoadFailed)。
    ///
    /// 加载会执行库中的静态初始化代码。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(load_failed(format!("{} not found", path.display())));
        }
        let lib = unsafe { Library::new(path) }
            .map_err(|e| load_failed(format!("{}: {e}", path.display())))?;
        info!("loaded module {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            lib: Arc::new(lib),
            symbols: Mutex::new(LruCache::new(SYMBOL_CACHE_SIZE)),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, name: &str) -> Result<PackedCFunc, Error> {
        let mut symbols = self.symbols.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&func) = symbols.get(name) {
            debug!("symbol {name} hit in cache");
            return Ok(func);
        }

        let mut symbol = name.as_bytes().to_vec();
        symbol.push(0);
        let func: Symbol<PackedCFunc> = unsafe { self.lib.get(&symbol) }.map_err(|e| {
            symbol_not_found(format!("{name} in {}: {e}", self.path.display()))
        })?;
        let func = *func;
        symbols.put(name.into(), func);
        Ok(func)
    }
}

impl Module for DylibModule {
    fn get_function(&self, name: &str) -> Result<Box<dyn Function + '_>, Error> {
        let func = self.resolve(name)?;
        info!("resolved {name} from {}", self.path.display());
        Ok(Box::new(PackedFunc::from_library(
            name,
            func,
            self.lib.clone(),
        )))
    }
}

#[cfg(test)]
mod test {
    use super::DylibModule;
    use crate::ErrorKind;
    use std::{env::temp_dir, fs};

    #[test]
    fn test_missing_path() {
        let err = DylibModule::load("lib/definitely_missing.so").err().unwrap();
        assert_eq!(err.kind, ErrorKind::LoadFailed);
    }

    #[test]
    fn test_not_a_library() {
        let path = temp_dir().join(format!("deploy-not-a-lib-{}.so", std::process::id()));
        fs::write(&path, "this is not a shared library").unwrap();
        let err = DylibModule::load(&path).err().unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(err.kind, ErrorKind::LoadFailed);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_lookup() {
        use super::Module;
        use std::path::Path;

        const CANDIDATES: [&str; 3] = [
            "/lib/x86_64-linux-gnu/libm.so.6",
            "/lib64/libm.so.6",
            "/usr/lib/libm.so.6",
        ];
        let Some(path) = CANDIDATES.into_iter().map(Path::new).find(|p| p.exists()) else {
            return;
        };
        let module = DylibModule::load(path).unwrap();
        assert_eq!(module.path(), path);

        let err = module.get_function("matmul_add_dyn").err().unwrap();
        assert_eq!(err.kind, ErrorKind::SymbolNotFound);
        assert!(!module.contains("matmul_add_dyn"));

        // 只解析不调用，`cos` 并不遵循打包调用约定
        assert!(module.resolve("cos").is_ok());
        assert!(module.resolve("cos").is_ok());
    }
}
