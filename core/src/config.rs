// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

use clap::Parser;

use crate::error::CreationError;

#[derive(Parser, Debug)]
#[command(name = "threadserver", disable_help_flag = false)]
struct Cli {
    #[arg(short = 'f', long = "config")]
    config: Option<String>,

    #[arg(short = 'd', long = "nodetach")]
    nodetach: bool,

    /// Swallows any option this binary doesn't recognize instead of erroring,
    /// matching the original's permissive `allow_unregistered()` CLI parser.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    _extra: Vec<String>,
}

/// A parsed `section.Key=value` configuration file, layered under CLI flags.
///
/// Mirrors the original's `boost::program_options` config-file reader: keys
/// are `section.Name`, repeated keys accumulate (so `main.Handler` can appear
/// once per handler), and lookups are case-sensitive and exact. `-f`/`--config`
/// and `-d`/`--nodetach` are the only two flags promoted to first-class
/// fields, matching the original's behavior of pulling just a handful of
/// options out of the file; any other CLI argument lands in `Cli::_extra` and
/// is silently ignored rather than rejected, matching the original's
/// `allow_unregistered()` parser.
pub struct Configuration {
    data: HashMap<String, Vec<String>>,
    pub nodetach: bool,
    pub handler_names: Vec<String>,
    pub listener_names: Vec<String>,
    pub pid_file: Option<String>,
}

impl Configuration {
    /// Parses `argv`-style arguments plus (if `--config` names one) a
    /// configuration file. Fails with `CreationError::Configuration` if no
    /// handlers or no listeners are declared -- both are required, per the
    /// original's fatal-at-boot checks.
    pub fn from_args(args: &[String]) -> Result<Configuration, CreationError> {
        let cli = Cli::try_parse_from(args).map_err(|e| CreationError::config(e.to_string()))?;

        let mut data = HashMap::new();
        if let Some(path) = &cli.config {
            let contents = fs::read_to_string(path).map_err(CreationError::Io)?;
            parse_ini(&contents, &mut data);
        }

        let handler_names = data.get("main.Handler").cloned().unwrap_or_default();
        let listener_names = data.get("main.Listener").cloned().unwrap_or_default();
        let pid_file = data.get("main.PidFile").and_then(|v| v.first().cloned());

        if handler_names.is_empty() {
            return Err(CreationError::config("no handlers defined"));
        }
        if listener_names.is_empty() {
            return Err(CreationError::config("no listeners defined"));
        }

        Ok(Configuration { data, nodetach: cli.nodetach, handler_names, listener_names, pid_file })
    }

    pub fn get<T: FromStr>(&self, key: &str) -> Result<T, CreationError> {
        let values = self
            .data
            .get(key)
            .ok_or_else(|| CreationError::config(format!("variable {} not found in configuration file", key)))?;
        values[0].parse().map_err(|_| CreationError::config(format!("invalid value for {}", key)))
    }

    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T { self.get(key).unwrap_or(default) }

    pub fn get_vector<T: FromStr>(&self, key: &str) -> Vec<T> {
        match self.data.get(key) {
            Some(values) => values.iter().filter_map(|v| v.parse().ok()).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, CreationError> {
        let value: String = self.get(key)?;
        parse_bool(&value).ok_or_else(|| CreationError::config(format!("invalid literal '{}' for boolean variable {}", value, key)))
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool { self.get_bool(key).unwrap_or(default) }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parses `section.Key=value` lines, accumulating repeated keys. Blank lines,
/// lines starting with `#` or `;`, and `[section]` headers (unused by this
/// flat key format but tolerated for readability) are skipped.
fn parse_ini(contents: &str, out: &mut HashMap<String, Vec<String>>) {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
            continue;
        }
        if let Some(pos) = line.find('=') {
            let key = line[..pos].trim().to_string();
            let value = line[pos + 1..].trim().to_string();
            out.entry(key).or_insert_with(Vec::new).push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_keys() {
        let mut data = HashMap::new();
        parse_ini("main.Handler=http\nmain.Handler=frpc\n", &mut data);
        assert_eq!(data["main.Handler"], vec!["http".to_string(), "frpc".to_string()]);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let mut data = HashMap::new();
        parse_ini("# comment\n\n; also a comment\nmain.PidFile=/tmp/x.pid\n", &mut data);
        assert_eq!(data["main.PidFile"], vec!["/tmp/x.pid".to_string()]);
    }

    #[test]
    fn bool_literals() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }
}
