use std::io::Write;

use env_logger::fmt::Formatter;

/// 统一的日志格式：`[时间] LEVEL [file:line] message`
fn truvis_format(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let info_style = buf
        .default_level_style(log::Level::Info)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
    let warn_style = buf
        .default_level_style(log::Level::Warn)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let error_style = buf
        .default_level_style(log::Level::Error)
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    let level_style = match record.level() {
        log::Level::Info => info_style,
        log::Level::Warn => warn_style,
        log::Level::Error => error_style,
        _ => buf.default_level_style(record.level()),
    };
    let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
    let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

    let line = record.line().unwrap_or(!0);
    let file = record.file().unwrap_or("").split(['\\', '/']).next_back().unwrap_or("");
    let time = chrono::Local::now().format("%H:%M:%S");
    let level = record.level();

    writeln!(
        buf,
        "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
         {black_style}{}{black_style:#}",
        record.args()
    )
}

/// 初始化全局 logger，默认 Info 级别
///
/// 只能调用一次，重复调用会 panic。
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

pub fn init_log_with_level(level: log::LevelFilter) {
    env_logger::Builder::new().format(truvis_format).filter(None, level).init();
}

/// 测试用的 logger
///
/// 输出交给 test harness 捕获，可以在每个测试里重复调用。
pub fn init_test_log() {
    let _ = env_logger::Builder::new()
        .format(truvis_format)
        .filter(None, log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
