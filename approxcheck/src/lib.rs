pub mod address_set;
pub mod analysis;
pub mod analysis_config;
pub mod backward_walker;
pub mod containers;
pub mod forward_propagator;
pub mod graphviz;
pub mod il;
pub mod il_parser;
pub mod marks;
pub mod report;
pub mod structural_equivalence;
#[cfg(test)]
mod tests;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    /// Map the number of `-d` flags to a severity: 0 warn, 1 info, 2 debug, 3+ trace
    pub fn severity_for(debug_level: usize) -> sloggers::types::Severity {
        use sloggers::types::Severity;
        match debug_level {
            0 => Severity::Warning,
            1 => Severity::Info,
            2 => Severity::Debug,
            _ => Severity::Trace,
        }
    }

    /// Sends records both to a compact terminal logger on stderr and, optionally, to a JSON log
    /// file. With a log file, the terminal only shows errors.
    pub struct FileAndTermDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }
    impl FileAndTermDrain {
        pub fn new(
            debug_level: usize,
            disable_terminal_logging: bool,
            force_block: bool,
            path: Option<std::path::PathBuf>,
        ) -> Result<slog::Logger, sloggers::Error> {
            use sloggers::types::{Format, OverflowStrategy, Severity};
            use sloggers::Build;

            let level = severity_for(debug_level);

            let term_drain = if disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build()?
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if path.is_none() { level } else { Severity::Error })
                    .overflow_strategy(if force_block || path.is_none() {
                        OverflowStrategy::Block
                    } else {
                        OverflowStrategy::DropAndReport
                    })
                    .format(Format::Compact)
                    .build()?
            };

            let file_drain = match path {
                Some(path) => Some(
                    sloggers::file::FileLoggerBuilder::new(path)
                        .truncate()
                        .level(level)
                        .overflow_strategy(OverflowStrategy::Block)
                        .format(Format::Json)
                        .build()?,
                ),
                None => None,
            };

            Ok(slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            ))
        }
    }
    impl slog::Drain for FileAndTermDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(
            &self,
            r: &slog::Record<'_>,
            kv: &slog::OwnedKVList,
        ) -> Result<<Self as slog::Drain>::Ok, <Self as slog::Drain>::Err> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)?;
            Ok(())
        }
    }
}
