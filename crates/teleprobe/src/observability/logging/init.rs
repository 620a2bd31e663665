use crate::config::from_env_or_panic;
use crate::observability::GLOBAL_LABELS;
use crate::prelude::*;
use serde::Deserialize;
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Instant;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME_PREFIX: &str = "teleprobe.log";

/// Keeps the background log writers alive. Call [`LoggingTask::shutdown`]
/// before exiting the process to flush the logs that weren't delivered yet.
pub struct LoggingTask {
    loki: Option<LokiTask>,
    file_guard: Option<WorkerGuard>,
}

struct LokiTask {
    task: tokio::task::JoinHandle<()>,
    controller: tracing_loki::BackgroundTaskController,
}

impl LoggingTask {
    pub async fn shutdown(self) {
        if let Some(LokiTask { task, controller }) = self.loki {
            info!("Waiting for the logging task to finish nicely...");

            let start = Instant::now();
            controller.shutdown().await;

            eprintln!(
                "Stopped logging task in {:.2?}: {:?}",
                start.elapsed(),
                task.await
            );
        }

        // Flushes the remaining buffered lines to the log file
        drop(self.file_guard);
    }
}

pub fn init_logging() -> LoggingTask {
    LoggingConfig::load_or_panic().init_logging()
}

#[derive(Deserialize)]
struct LoggingConfig {
    /// Directory for daily-rotated log files. Logs go only to stderr if unset.
    log_dir: Option<PathBuf>,

    /// Grafana Loki endpoint to ship the logs to.
    loki_url: Option<url::Url>,
}

impl LoggingConfig {
    fn load_or_panic() -> LoggingConfig {
        from_env_or_panic("")
    }

    fn init_logging(self) -> LoggingTask {
        let env_filter =
            EnvFilter::try_from_env("TELEPROBE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::env::var("COLORS").as_deref() != Ok("0"))
            .pretty();

        let (file, file_guard) = self
            .log_dir
            .map(|log_dir| {
                let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer);
                (layer, guard)
            })
            .unzip();

        let (loki, loki_task) = self.loki_url.map(init_loki).unzip();

        tracing_subscriber::registry()
            .with(fmt)
            .with(file)
            .with(loki)
            .with(env_filter)
            .with(tracing_error::ErrorLayer::default())
            .init();

        init_panic_hook();

        LoggingTask {
            loki: loki_task,
            file_guard,
        }
    }
}

fn init_loki(loki_url: url::Url) -> (tracing_loki::Layer, LokiTask) {
    let (layer, controller, task) = GLOBAL_LABELS
        .iter()
        .fold(tracing_loki::builder(), |builder, (key, value)| {
            builder.label(*key, *value).unwrap_or_else(|err| {
                panic!("BUG: invalid loki label `{key}={value}`: {err:#?}")
            })
        })
        .build_controller_url(loki_url)
        .unwrap_or_else(|err| panic!("BUG: couldn't initialize the loki layer: {err:#?}"));

    let task = LokiTask {
        task: tokio::spawn(task),
        controller,
    };

    (layer, task)
}

fn init_panic_hook() {
    let current_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        // It's super-important to call the default panic hook, otherwise
        // we may not see it in the logs at all, because the panic may
        // happen inside of `tracing` logging system itself.
        current_hook(panic_info);

        let backtrace = std::backtrace::Backtrace::capture();
        let location = panic_info.location().map(|location| {
            format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            )
        });

        // If the panic message was formatted using interpolated values,
        // it will be a `String`. Otherwise, it will be a `&str`.
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<String>()
            .map(<_>::deref)
            .or_else(|| payload.downcast_ref::<&str>().map(<_>::deref))
            .unwrap_or("<unknown>");

        let span_trace = tracing_error::SpanTrace::capture();

        error!(
            target: "panic",
            thread = std::thread::current().name(),
            location,
            span_trace = %span_trace,
            backtrace = format_args!("\n{backtrace}"),
            "{message}"
        );
    }));
}
