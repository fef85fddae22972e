use std::{fmt, io};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    LoadFailed,
    SymbolNotFound,
    SignatureMismatch,
    AllocFailed,
    DeviceNotSupport,
    TypeNotSupport,
    ShapeMismatch,
    ArgsNotSupport,
    ExecutionFailed,
    ProfilerMisuse,
    MetricNotSupport,
    Io,
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub info: String,
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    #[inline]
    fn from(e: io::Error) -> Self {
        functions::io_failed(e.to_string())
    }
}

pub(super) mod functions {
    use super::{Error, ErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(Error: load_failed         LoadFailed       );
    builder!(Error: symbol_not_found    SymbolNotFound   );
    builder!(Error: signature_mismatch  SignatureMismatch);
    builder!(Error: alloc_failed        AllocFailed      );
    builder!(Error: device_not_support  DeviceNotSupport );
    builder!(Error: type_not_support    TypeNotSupport   );
    builder!(Error: shape_mismatch      ShapeMismatch    );
    builder!(Error: args_not_support    ArgsNotSupport   );
    builder!(Error: execution_failed    ExecutionFailed  );
    builder!(Error: profiler_misuse     ProfilerMisuse   );
    builder!(Error: metric_not_support  MetricNotSupport );

    builder!(Error: io_failed           Io               );
}
