//! Kernel-space drivers
//!
//! Минимально необходимые для отладки / Minimum required for debugging:
//!   - UART/Serial  — отладочный вывод в терминал QEMU
//!   - logger       — `log::Log` поверх UART / `log::Log` on top of the UART

#[cfg(target_os = "none")]
pub mod logger;
#[cfg(target_os = "none")]
pub mod uart;

/// Макрос для отладочного вывода.
/// Debug print macro.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::drivers::uart::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    ()           => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
