use std::fmt;

use learn_core::model::{Language, LessonId};

pub const DEFAULT_DB_URL: &str = "sqlite://learn.sqlite3";

#[derive(Debug, PartialEq, Eq)]
pub enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidMinutes { raw: String },
    InvalidLessonId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidMinutes { raw } => write!(f, "invalid --minutes value: {raw}"),
            ArgsError::InvalidLessonId { raw } => write!(f, "invalid --lesson value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select { minutes: i64, mood: Option<String> },
    Play { lesson: LessonId },
    Status,
    Restore,
    Dashboard,
    Signout,
}

/// Values taken from the environment before flags are applied.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub db_url: String,
    pub language: Language,
}

impl Defaults {
    /// Reads `LEARN_DB_URL` and `LEARN_LANG`.
    pub fn from_env() -> Self {
        Self {
            db_url: std::env::var("LEARN_DB_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url),
            language: std::env::var("LEARN_LANG")
                .map(|code| Language::from_code(&code))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
pub struct Args {
    pub db_url: String,
    pub language: Language,
    pub command: Command,
}

impl Args {
    /// Parses `argv` (without the program name). `Ok(None)` means help was
    /// requested.
    pub fn parse(
        argv: impl IntoIterator<Item = String>,
        defaults: &Defaults,
    ) -> Result<Option<Self>, ArgsError> {
        let mut args = argv.into_iter();
        let name = match args.next() {
            None => "status".to_owned(),
            Some(first) if matches!(first.as_str(), "--help" | "-h" | "help") => return Ok(None),
            Some(first) => first,
        };

        let mut db_url = defaults.db_url.clone();
        let mut language = defaults.language;
        let mut minutes = None;
        let mut mood = None;
        let mut lesson = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--lang" => {
                    language = Language::from_code(&require_value(&mut args, "--lang")?);
                }
                "--minutes" if name == "select" => {
                    let value = require_value(&mut args, "--minutes")?;
                    let parsed = value
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ArgsError::InvalidMinutes { raw: value.clone() })?;
                    minutes = Some(parsed);
                }
                "--mood" if name == "select" => {
                    mood = Some(require_value(&mut args, "--mood")?);
                }
                "--lesson" if name == "play" => {
                    let value = require_value(&mut args, "--lesson")?;
                    let parsed = value
                        .parse::<LessonId>()
                        .map_err(|_| ArgsError::InvalidLessonId { raw: value.clone() })?;
                    lesson = Some(parsed);
                }
                "--help" | "-h" => return Ok(None),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = match name.as_str() {
            "select" => Command::Select {
                minutes: minutes.ok_or(ArgsError::MissingFlag { flag: "--minutes" })?,
                mood,
            },
            "play" => Command::Play {
                lesson: lesson.ok_or(ArgsError::MissingFlag { flag: "--lesson" })?,
            },
            "status" => Command::Status,
            "restore" => Command::Restore,
            "dashboard" => Command::Dashboard,
            "signout" => Command::Signout,
            _ => return Err(ArgsError::UnknownCommand(name)),
        };

        Ok(Some(Self {
            db_url,
            language,
            command,
        }))
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  learn select --minutes <5|10|15|20> [--mood <mood>]");
    eprintln!("  learn play --lesson <id>");
    eprintln!("  learn status");
    eprintln!("  learn restore");
    eprintln!("  learn dashboard");
    eprintln!("  learn signout");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>   (default {DEFAULT_DB_URL})");
    eprintln!("  --lang <en|tl>      (default en)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_LANG, LEARN_API_BASE_URL, LEARN_API_TOKEN,");
    eprintln!("  LEARN_API_TIMEOUT_SECS, RUST_LOG");
}

pub fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}
