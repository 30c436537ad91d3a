//! Operator shell commands
//!
//! ```text
//! bootstrap list | info <client> | discover <client> <path> | read <client> <path>
//!           | write <client> <path> <data> | delete <client> <path> | finish <client>
//! lwm2m     list | info <client> | discover <client> <path> | read <client> <path>
//!           | write <client> <path> <data> | delete <client> <path>
//! help | exit
//! ```
//!
//! Arguments are separated by whitespace; wrap an argument in double
//! quotes to keep its spaces, e.g. `write dev1 /1/0/1 "[{\"v\": 300}]"`.

use lwm2m_core::Lwm2mError;
use lwm2m_server::DeviceOperations;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  bootstrap list                          list bootstrap clients
  bootstrap info <client>                 show bootstrap session
  bootstrap discover <client> <path>      bootstrap discover
  bootstrap read <client> <path>          bootstrap read
  bootstrap write <client> <path> <data>  bootstrap write
  bootstrap delete <client> <path>        bootstrap delete
  bootstrap finish <client>               bootstrap finish
  lwm2m list                              list registered clients
  lwm2m info <client>                     show registration
  lwm2m discover <client> <path>          discover
  lwm2m read <client> <path>              read
  lwm2m write <client> <path> <data>      write
  lwm2m delete <client> <path>            delete
  help                                    show this help
  exit                                    stop the servers and quit";

/// Shell errors
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("wrong argument count")]
    WrongArgumentCount,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error(transparent)]
    Device(#[from] Lwm2mError),
}

/// Which server a device command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Bootstrap,
    Lwm2m,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    List,
    Info { client: String },
    Discover { client: String, path: String },
    Read { client: String, path: String },
    Write { client: String, path: String, data: String },
    Delete { client: String, path: String },
    Finish { client: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Device(Target, Verb),
    Help,
    Exit,
    Empty,
}

/// Split a line into arguments, honoring double quotes and `\"` inside them
pub fn tokenize(line: &str) -> Result<Vec<String>, ShellError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_arg = true;
            }
            '\\' if quoted => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(ShellError::UnterminatedQuote),
            },
            c if c.is_whitespace() && !quoted => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if quoted {
        return Err(ShellError::UnterminatedQuote);
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ShellError> {
        let args = tokenize(line)?;
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Empty);
        };

        match name.as_str() {
            "help" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            "bootstrap" => parse_verb(Target::Bootstrap, rest),
            "lwm2m" => parse_verb(Target::Lwm2m, rest),
            other => Err(ShellError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_verb(target: Target, args: &[String]) -> Result<Command, ShellError> {
    let Some((verb, args)) = args.split_first() else {
        return Err(ShellError::WrongArgumentCount);
    };

    let verb = match (verb.as_str(), args) {
        ("list", []) => Verb::List,
        ("info", [client]) => Verb::Info {
            client: client.clone(),
        },
        ("discover", [client, path]) => Verb::Discover {
            client: client.clone(),
            path: path.clone(),
        },
        ("read", [client, path]) => Verb::Read {
            client: client.clone(),
            path: path.clone(),
        },
        ("write", [client, path, data]) => Verb::Write {
            client: client.clone(),
            path: path.clone(),
            data: data.clone(),
        },
        ("delete", [client, path]) => Verb::Delete {
            client: client.clone(),
            path: path.clone(),
        },
        ("finish", [client]) if target == Target::Bootstrap => Verb::Finish {
            client: client.clone(),
        },
        ("list" | "info" | "discover" | "read" | "write" | "delete", _) => {
            return Err(ShellError::WrongArgumentCount);
        }
        ("finish", _) if target == Target::Bootstrap => {
            return Err(ShellError::WrongArgumentCount);
        }
        (other, _) => {
            let prefix = match target {
                Target::Bootstrap => "bootstrap",
                Target::Lwm2m => "lwm2m",
            };
            return Err(ShellError::UnknownCommand(format!("{} {}", prefix, other)));
        }
    };

    Ok(Command::Device(target, verb))
}

/// Executes device commands against the two servers
#[derive(Clone)]
pub struct Shell {
    bootstrap: DeviceOperations,
    lwm2m: DeviceOperations,
}

impl Shell {
    pub fn new(bootstrap: DeviceOperations, lwm2m: DeviceOperations) -> Self {
        Self { bootstrap, lwm2m }
    }

    pub fn operations(&self, target: Target) -> &DeviceOperations {
        match target {
            Target::Bootstrap => &self.bootstrap,
            Target::Lwm2m => &self.lwm2m,
        }
    }

    /// Run one device command
    ///
    /// # Returns
    /// The text to print, if any
    pub async fn execute(&self, target: Target, verb: Verb) -> Result<Option<String>, ShellError> {
        let operations = self.operations(target);
        let output = match verb {
            Verb::List => Some(operations.list().await.join("\n")),
            Verb::Info { client } => {
                Some(operations.registry().session(&client).await?.to_string())
            }
            Verb::Discover { client, path } => Some(operations.discover(&client, &path).await?),
            Verb::Read { client, path } => Some(operations.read(&client, &path).await?),
            Verb::Write { client, path, data } => {
                operations.write(&client, &path, &data).await?;
                None
            }
            Verb::Delete { client, path } => {
                operations.delete(&client, &path).await?;
                None
            }
            Verb::Finish { client } => {
                operations.finish(&client).await?;
                None
            }
        };

        Ok(output.filter(|text| !text.is_empty()))
    }
}
