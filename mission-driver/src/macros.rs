/// Logs under the `udefx::<component>` target so the component shows up in
/// the `[target]` slot of the log line.
/// Usage:
/// ```ignore
/// udefx_log!(Level::Info, "lifecycle", "session active");
/// udefx_log!(Level::Warn, "watch", "interrupt watch lost: {}", err);
/// ```
/// Logs like:
/// [2026-04-25T16:32:10+02:00][WARN ][udefx::watch][pid=4568][tid=ThreadId(3)] interrupt watch lost: pipe halted
#[macro_export]
macro_rules! udefx_log {
    ($level:expr, $component:literal, $fmt:literal $(, $($arg:tt)+)?) => {
        log::log!(
            target: concat!("udefx::", $component),
            $level,
            $fmt
            $(, $($arg)+)?
        )
    };
}
