use redis_table::observability::init_logging;
use redis_table::{ConnectionManager, Table, TableOptions};
use serde_json::Value;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = "\
usage: redis-table <namespace> <command> [args]

commands:
  get <key>
  set <key> <value> [seconds]
  update <key> <json-object> [seconds]
  del <key>
  exists <key>
  expire <key> <seconds>
  ttl <key>

The endpoint comes from REDIS_URL or REDIS_PORT. Values that parse as JSON
are stored as JSON, anything else as plain text.";

#[derive(Debug, PartialEq)]
enum Command {
    Get { key: String },
    Set {
        key: String,
        value: Value,
        seconds: Option<u64>,
    },
    Update {
        key: String,
        partial: Value,
        seconds: Option<u64>,
    },
    Del { key: String },
    Exists { key: String },
    Expire { key: String, seconds: u64 },
    Ttl { key: String },
}

impl Command {
    fn parse(args: &[String]) -> Result<Command, String> {
        let (name, rest) = args.split_first().ok_or("missing command")?;
        let arg = |i: usize, what: &str| {
            rest.get(i)
                .cloned()
                .ok_or_else(|| format!("{} needs <{}>", name, what))
        };
        let seconds = |i: usize| -> Result<Option<u64>, String> {
            rest.get(i)
                .map(|s| s.parse().map_err(|_| format!("invalid seconds: {}", s)))
                .transpose()
        };

        let command = match name.as_str() {
            "get" => Command::Get {
                key: arg(0, "key")?,
            },
            "set" => Command::Set {
                key: arg(0, "key")?,
                value: parse_value(&arg(1, "value")?),
                seconds: seconds(2)?,
            },
            "update" => Command::Update {
                key: arg(0, "key")?,
                partial: serde_json::from_str(&arg(1, "json-object")?)
                    .map_err(|e| format!("update needs a JSON object: {}", e))?,
                seconds: seconds(2)?,
            },
            "del" => Command::Del {
                key: arg(0, "key")?,
            },
            "exists" => Command::Exists {
                key: arg(0, "key")?,
            },
            "expire" => Command::Expire {
                key: arg(0, "key")?,
                seconds: seconds(1)?.ok_or("expire needs <seconds>")?,
            },
            "ttl" => Command::Ttl {
                key: arg(0, "key")?,
            },
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(command)
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn execute(table: &Table, command: Command) -> Result<String, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Get { key } => match table.read(&key).await? {
            Some(value) => value.to_string(),
            None => "(nil)".to_string(),
        },
        Command::Set {
            key,
            value,
            seconds,
        } => {
            table.create(&key, &value, seconds).await?;
            "OK".to_string()
        }
        Command::Update {
            key,
            partial,
            seconds,
        } => match table.update(&key, &partial, seconds).await? {
            Some(merged) => merged.to_string(),
            None => "(nil)".to_string(),
        },
        Command::Del { key } => table.delete(&key).await?.to_string(),
        Command::Exists { key } => table.exists(&key).await?.to_string(),
        Command::Expire { key, seconds } => table.set_expiration(&key, seconds).await?.to_string(),
        Command::Ttl { key } => match table.remaining_ttl(&key).await? {
            Some(seconds) => seconds.to_string(),
            None => "(none)".to_string(),
        },
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((namespace, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    let command = match Command::parse(rest) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let manager = match ConnectionManager::from_env() {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let table = match Table::bind(manager.clone(), TableOptions::new(namespace.clone())) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = execute(&table, command).await;
    if let Err(e) = manager.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }

    match result {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
