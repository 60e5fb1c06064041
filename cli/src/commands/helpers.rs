use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

use runzen_core::models::parse_timestamp;

/// Parse a `--at` value. `None` and `now` mean the current time; `today` and
/// `yesterday` mean midnight of that day.
pub(crate) fn parse_when(input: Option<String>) -> Result<NaiveDateTime> {
    let now = Local::now().naive_local();
    let now = now.with_nanosecond(0).unwrap_or(now);
    match input.as_deref().map(str::trim) {
        None | Some("now") => Ok(now),
        Some("today") => Ok(now.date().and_time(NaiveTime::MIN)),
        Some("yesterday") => Ok((now.date() - Duration::days(1)).and_time(NaiveTime::MIN)),
        Some(s) => parse_timestamp(s),
    }
}

/// Parse a duration given as plain seconds, `MM:SS` or `HH:MM:SS`.
pub(crate) fn parse_duration(input: &str) -> Result<i64> {
    let s = input.trim();
    let parts: Vec<&str> = s.split(':').collect();
    let numbers = parts
        .iter()
        .map(|p| p.parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid duration '{s}'. Use seconds, MM:SS or HH:MM:SS"))?;
    if numbers.iter().any(|n| *n < 0) {
        bail!("Duration must not be negative");
    }
    let seconds = match numbers.as_slice() {
        [secs] => *secs,
        [mins, secs] if *secs < 60 => mins * 60 + secs,
        [hours, mins, secs] if *mins < 60 && *secs < 60 => hours * 3600 + mins * 60 + secs,
        _ => bail!("Invalid duration '{s}'. Use seconds, MM:SS or HH:MM:SS"),
    };
    Ok(seconds)
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// Report a missing record the way each output mode expects.
pub(crate) fn report_not_found(message: &str, json: bool) {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
}
