//! Kernel Console Output
//!
//! `kprint!` and `kprintln!` keep the familiar kernel console spelling but
//! write through the `log` facade, so the embedding kernel decides where
//! console text ends up (UART, ring buffer, host stderr).

/// Print to the kernel console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::__log::info!(target: "console", $($arg)*);
    }};
}

/// Print a line to the kernel console.
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("")
    };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
    }};
}
