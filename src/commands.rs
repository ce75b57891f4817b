//! Maps a decoded request to a handler, validates arity, and translates store
//! results into wire replies. This is the contract between the codec and the
//! store — everything here is synchronous bookkeeping around a handful of
//! `await`s on `Store` methods.

use crate::error::CommandError;
use crate::resp::{Reply, Request};
use crate::store::Store;
use bytes::Bytes;
use std::time::Duration;

const WRONG_TYPE_MSG: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

enum Command {
    Ping,
    Echo(Bytes),
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        px_millis: Option<i64>,
    },
    Del(Vec<Bytes>),
    RPush { key: Bytes, values: Vec<Bytes> },
    LPush { key: Bytes, values: Vec<Bytes> },
    LRange { key: Bytes, start: isize, stop: isize },
    LLen(Bytes),
}

fn parse_signed(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn parse_command(args: &[Bytes]) -> Result<Command, CommandError> {
    let name = std::str::from_utf8(&args[0])
        .map_err(|_| CommandError::UnknownCommand)?
        .to_ascii_uppercase();

    let arity_err = || CommandError::WrongArity(name.to_ascii_lowercase());

    match name.as_str() {
        "PING" => {
            if args.len() != 1 {
                return Err(arity_err());
            }
            Ok(Command::Ping)
        }
        "ECHO" => {
            if args.len() != 2 {
                return Err(arity_err());
            }
            Ok(Command::Echo(args[1].clone()))
        }
        "GET" => {
            if args.len() != 2 {
                return Err(arity_err());
            }
            Ok(Command::Get(args[1].clone()))
        }
        "SET" => {
            if args.len() < 3 {
                return Err(arity_err());
            }
            let key = args[1].clone();
            let value = args[2].clone();
            if args.len() == 3 {
                return Ok(Command::Set { key, value, px_millis: None });
            }
            if args.len() != 5 {
                return Err(CommandError::Syntax);
            }
            let opt = std::str::from_utf8(&args[3]).map_err(|_| CommandError::Syntax)?;
            if !opt.eq_ignore_ascii_case("PX") {
                return Err(CommandError::Syntax);
            }
            let ms = parse_signed(&args[4]).ok_or(CommandError::Syntax)?;
            Ok(Command::Set { key, value, px_millis: Some(ms) })
        }
        "DEL" => {
            if args.len() < 2 {
                return Err(arity_err());
            }
            Ok(Command::Del(args[1..].to_vec()))
        }
        "RPUSH" => {
            if args.len() < 3 {
                return Err(arity_err());
            }
            Ok(Command::RPush { key: args[1].clone(), values: args[2..].to_vec() })
        }
        "LPUSH" => {
            if args.len() < 3 {
                return Err(arity_err());
            }
            Ok(Command::LPush { key: args[1].clone(), values: args[2..].to_vec() })
        }
        "LRANGE" => {
            if args.len() != 4 {
                return Err(arity_err());
            }
            let start = parse_signed(&args[2]).ok_or(CommandError::InvalidInt)?;
            let stop = parse_signed(&args[3]).ok_or(CommandError::InvalidInt)?;
            Ok(Command::LRange { key: args[1].clone(), start: start as isize, stop: stop as isize })
        }
        "LLEN" => {
            if args.len() != 2 {
                return Err(arity_err());
            }
            Ok(Command::LLen(args[1].clone()))
        }
        _ => Err(CommandError::UnknownCommand),
    }
}

async fn execute(cmd: Command, store: &Store) -> Reply {
    match cmd {
        Command::Ping => Reply::simple("PONG"),
        Command::Echo(msg) => Reply::Bulk(msg),
        Command::Get(key) => match store.get(&key).await {
            Ok(Some(v)) => Reply::Bulk(v),
            Ok(None) => Reply::NullBulk,
            Err(_) => Reply::error(WRONG_TYPE_MSG),
        },
        Command::Set { key, value, px_millis } => {
            let ttl = px_millis.map(|ms| Duration::from_millis(ms.max(0) as u64));
            store.set(key, value, ttl).await;
            Reply::simple("OK")
        }
        Command::Del(keys) => Reply::Int(store.delete_many(&keys).await as i64),
        Command::RPush { key, values } => Reply::Int(store.rpush(&key, values).await),
        Command::LPush { key, values } => Reply::Int(store.lpush(&key, values).await),
        Command::LRange { key, start, stop } => match store.lrange(&key, start, stop).await {
            Ok(Some(values)) => Reply::Array(values.into_iter().map(Reply::Bulk).collect()),
            Ok(None) => Reply::Array(Vec::new()),
            Err(_) => Reply::error(WRONG_TYPE_MSG),
        },
        Command::LLen(key) => match store.list_len(&key).await {
            Ok(Some(n)) => Reply::Int(n),
            Ok(None) => Reply::Int(0),
            Err(_) => Reply::error(WRONG_TYPE_MSG),
        },
    }
}

/// Parses and runs one request against `store`, producing the reply to send.
pub async fn dispatch(args: Request, store: &Store) -> Reply {
    if args.is_empty() {
        return Reply::error("Unknown command");
    }
    match parse_command(&args) {
        Ok(cmd) => execute(cmd, store).await,
        Err(err) => Reply::error(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn req(parts: &[&str]) -> Request {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[tokio::test]
    async fn ping_and_echo() {
        let store = Store::new();
        assert_eq!(dispatch(req(&["PING"]), &store).await, Reply::simple("PONG"));
        assert_eq!(
            dispatch(req(&["ECHO", "hi"]), &store).await,
            Reply::bulk("hi")
        );
    }

    #[tokio::test]
    async fn unknown_command() {
        let store = Store::new();
        assert_eq!(
            dispatch(req(&["NOSUCHCMD"]), &store).await,
            Reply::error("Unknown command")
        );
    }

    #[tokio::test]
    async fn set_get_wrong_arity() {
        let store = Store::new();
        assert_eq!(dispatch(req(&["SET", "k", "v"]), &store).await, Reply::simple("OK"));
        assert_eq!(dispatch(req(&["GET", "k"]), &store).await, Reply::bulk("v"));
        assert_eq!(
            dispatch(req(&["GET"]), &store).await,
            Reply::error("Wrong number of arguments for 'get' command")
        );
    }

    #[tokio::test]
    async fn set_with_bad_option_is_syntax_error() {
        let store = Store::new();
        assert_eq!(
            dispatch(req(&["SET", "k", "v", "EX", "10"]), &store).await,
            Reply::error("syntax error")
        );
        assert_eq!(
            dispatch(req(&["SET", "k", "v", "PX", "nope"]), &store).await,
            Reply::error("syntax error")
        );
    }

    #[tokio::test]
    async fn lrange_on_missing_key_is_empty_array() {
        let store = Store::new();
        assert_eq!(
            dispatch(req(&["LRANGE", "nope", "0", "-1"]), &store).await,
            Reply::Array(vec![])
        );
    }

    #[tokio::test]
    async fn lrange_non_integer_index_is_invalid_int() {
        let store = Store::new();
        assert_eq!(
            dispatch(req(&["LRANGE", "k", "x", "1"]), &store).await,
            Reply::error("Value is not an integer or out of range")
        );
    }

    #[tokio::test]
    async fn rpush_lrange_llen_roundtrip() {
        let store = Store::new();
        assert_eq!(
            dispatch(req(&["RPUSH", "L", "a", "b", "c"]), &store).await,
            Reply::Int(3)
        );
        assert_eq!(
            dispatch(req(&["LRANGE", "L", "0", "-1"]), &store).await,
            Reply::Array(vec![Reply::bulk("a"), Reply::bulk("b"), Reply::bulk("c")])
        );
        assert_eq!(dispatch(req(&["LLEN", "L"]), &store).await, Reply::Int(3));
    }

    #[tokio::test]
    async fn get_on_list_key_is_wrong_type() {
        let store = Store::new();
        dispatch(req(&["SET", "L", "hello"]), &store).await;
        dispatch(req(&["LPUSH", "L", "x"]), &store).await;
        assert_eq!(
            dispatch(req(&["GET", "L"]), &store).await,
            Reply::error(WRONG_TYPE_MSG)
        );
    }
}
