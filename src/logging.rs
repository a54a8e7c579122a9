//! 日志宏封装
//! 启用 `logging` 特性时转发到 tracing，关闭时不产生任何输出（参数仍参与类型检查）

macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::tracing::$level!($($arg)*);
        }
        #[cfg(not(feature = "logging"))]
        {
            if false {
                let _ = format!($($arg)*);
            }
        }
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { $crate::logging::log_event!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { $crate::logging::log_event!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { $crate::logging::log_event!(info, $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::logging::log_event!(warn, $($arg)*) };
}

pub(crate) use {debug, info, log_event, trace};
pub(crate) use log_warn as warn;
