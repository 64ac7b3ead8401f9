//! The implementation of the `LIRBE_LOG*` environment variables.
//!
//! `LIRBE_LOG=[<path|->:]<level>` controls normal logging; `LIRBE_LOG_IR`
//! takes a comma-separated list of phases (`lir`, `asm`) and dumps the LIR
//! (via [crate::lir::print_lir]) or the emitted code summary at those points.

use std::{
    collections::HashSet,
    env,
    error::Error,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::LazyLock,
};

use strum::{EnumCount, FromRepr};

/// How verbose should normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors (including compilation bailouts).
    Error,
    /// Log warnings.
    Warning,
    /// Log per-method compilation events.
    CompileEvent,
}

pub struct Log {
    level: Verbosity,
    /// The path to write to; `None` means stderr.
    path: Option<PathBuf>,
}

impl Log {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        match env::var("LIRBE_LOG") {
            Ok(s) => {
                let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
                    [path, level] => {
                        if path == "-" {
                            (None, level)
                        } else {
                            let path = PathBuf::from(path);
                            // Truncate any log left over from a previous run.
                            File::create(&path).ok();
                            (Some(path), level)
                        }
                    }
                    [level] => (None, level),
                    [..] => return Err("LIRBE_LOG must be of the format `[<path|->:]<level>`".into()),
                };
                let level = level
                    .parse::<u8>()
                    .map_err(|e| format!("Invalid LIRBE_LOG level '{s}': {e}"))?;
                let max_level = u8::try_from(Verbosity::COUNT).unwrap() - 1;
                let level = Verbosity::from_repr(level)
                    .ok_or_else(|| format!("LIRBE_LOG level {level} exceeds maximum {max_level}"))?;
                Ok(Self { path, level })
            }
            Err(_) => Ok(Self { path: None, level: Verbosity::Error }),
        }
    }

    /// Log to `path` at `level`, regardless of the environment; used by tests
    /// that capture output.
    #[cfg(test)]
    pub(crate) fn with_path(path: PathBuf, level: Verbosity) -> Self {
        File::create(&path).ok();
        Self { path: Some(path), level }
    }

    /// Log `msg` at `level`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "lirbe-error",
                Verbosity::Warning => "lirbe-warning",
                Verbosity::CompileEvent => "lirbe-compile",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}

/// At which point in the backend an IR dump is taken.
#[derive(Eq, Hash, PartialEq)]
pub enum IRPhase {
    /// The LIR as handed to the assembler driver (post allocation).
    Lir,
    /// A summary of the emitted machine code and its side tables.
    Asm,
}

impl IRPhase {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "lir" => Ok(Self::Lir),
            "asm" => Ok(Self::Asm),
            _ => Err(format!("Invalid LIRBE_LOG_IR value: {s}").into()),
        }
    }
}

static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
    let mut log_phases = HashSet::new();
    if let Ok(x) = env::var("LIRBE_LOG_IR") {
        let (path, phases) = match x.split(':').collect::<Vec<_>>().as_slice() {
            [path, phases] => (*path, *phases),
            [phases] => ("-", *phases),
            _ => panic!("LIRBE_LOG_IR must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'"),
        };
        for x in phases.split(',') {
            log_phases.insert(IRPhase::from_str(x).unwrap());
        }
        if path != "-" {
            File::create(path).ok();
        }
        Some((path.to_string(), log_phases))
    } else {
        None
    }
});

pub fn should_log_ir(phase: IRPhase) -> bool {
    matches!(
        LOG_IR.as_ref().map(|(_, phases)| phases.contains(&phase)),
        Some(true)
    )
}

pub fn log_ir(s: &str) {
    match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
        Some("-") => eprint!("{s}"),
        Some(x) => {
            File::options()
                .append(true)
                .open(x)
                .map(|mut f| f.write(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
