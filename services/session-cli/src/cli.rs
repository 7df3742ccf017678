//! Argument parsing
//!
//! `sessionctl [--config PATH] [--ephemeral] <command> [args]`. Global flags
//! must come before the command.

use transport::Method;

use crate::error::{Error, Result};

pub const USAGE: &str = "\
Usage: sessionctl [--config PATH] [--ephemeral] <command>

Commands:
  login <email> [--password P]              Log in and store the token pair
  signup <username> <email> [--password P]  Create an account, then log in
  logout                                    End the session and revoke the refresh token
  status                                    Show whether a session is stored
  request <METHOD> <PATH> [--body JSON]     Send an authenticated request

Options:
  --config PATH   Config file (default: $CONFIG_PATH or ./sessionctl.toml)
  --ephemeral     Keep credentials in memory only
  -h, --help      Show this help";

#[derive(Debug, PartialEq)]
pub struct Cli {
    pub config: Option<String>,
    pub ephemeral: bool,
    pub command: Command,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Login {
        email: String,
        password: Option<String>,
    },
    Signup {
        username: String,
        email: String,
        password: Option<String>,
    },
    Logout,
    Status,
    Request {
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    },
    Help,
}

/// Parse arguments (without the program name).
pub fn parse<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let mut config = None;
    let mut ephemeral = false;

    while let Some(arg) = args.next_if(|a| a.starts_with('-')) {
        match arg.as_str() {
            "--config" => config = Some(value_for(&mut args, "--config")?),
            "--ephemeral" => ephemeral = true,
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    ephemeral,
                    command: Command::Help,
                });
            }
            other => return Err(Error::Usage(format!("unknown option: {other}"))),
        }
    }

    let name = args
        .next()
        .ok_or_else(|| Error::Usage("missing command".into()))?;
    let rest: Vec<String> = args.collect();

    let command = match name.as_str() {
        "login" => {
            let (positional, password) = split_flag(rest, "--password")?;
            let [email] = take_positional(positional, ["<email>"])?;
            Command::Login { email, password }
        }
        "signup" => {
            let (positional, password) = split_flag(rest, "--password")?;
            let [username, email] = take_positional(positional, ["<username>", "<email>"])?;
            Command::Signup {
                username,
                email,
                password,
            }
        }
        "logout" => {
            take_positional(rest, [])?;
            Command::Logout
        }
        "status" => {
            take_positional(rest, [])?;
            Command::Status
        }
        "request" => {
            let (positional, body) = split_flag(rest, "--body")?;
            let [method, path] = take_positional(positional, ["<METHOD>", "<PATH>"])?;
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::InvalidMethod(method))?;
            let body = body
                .map(|b| serde_json::from_str(&b).map_err(|e| Error::InvalidBody(e.to_string())))
                .transpose()?;
            Command::Request { method, path, body }
        }
        "help" => Command::Help,
        other => return Err(Error::Usage(format!("unknown command: {other}"))),
    };

    Ok(Cli {
        config,
        ephemeral,
        command,
    })
}

fn value_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| Error::Usage(format!("{flag} needs a value")))
}

/// Pull `flag VALUE` out of `args`, returning the remaining positionals.
fn split_flag(args: Vec<String>, flag: &str) -> Result<(Vec<String>, Option<String>)> {
    let mut positional = Vec::new();
    let mut value = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            value = Some(value_for(&mut iter, flag)?);
        } else if arg.starts_with("--") {
            return Err(Error::Usage(format!("unknown option: {arg}")));
        } else {
            positional.push(arg);
        }
    }
    Ok((positional, value))
}

fn take_positional<const N: usize>(args: Vec<String>, names: [&str; N]) -> Result<[String; N]> {
    if args.len() > N {
        return Err(Error::Usage(format!("unexpected argument: {}", args[N])));
    }
    if args.len() < N {
        return Err(Error::Usage(format!("missing {}", names[args.len()])));
    }
    args.try_into()
        .map_err(|_| Error::Usage("wrong number of arguments".into()))
}
