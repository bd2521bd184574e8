//! Command Handler Module
//!
//! This module implements the command processing layer for sparkkv. It
//! receives parsed RESP frames, validates the command shape, executes
//! against the keyspace engine and returns the RESP response. Mutating
//! commands that succeed are appended to the AOF.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [EX seconds | PX milliseconds]` - Store a key
//! - `GET key` - Fetch a key
//! - `DEL key [key ...]` - Delete keys, counting live removals
//! - `CONFIG SET parameter value` / `CONFIG GET parameter`
//! - `AOF ENABLE` / `AOF DISABLE`
//! - `INFO` - Server information
//!
//! Configurable parameters: `maxmemory` (bytes), `appendfsync`
//! (`everysec` | `no`).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    CommandHandler                       │
//! │                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐  │
//! │  │  validate   │──>│  dispatch   │──>│   execute    │  │
//! │  └─────────────┘   └─────────────┘   └──────┬───────┘  │
//! │                                             │           │
//! │                                  ┌──────────┴───────┐  │
//! │                                  ▼                  ▼  │
//! │                           StorageEngine          AofLog │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Command errors are RESP Error values; they never tear down the
//! connection.

use crate::persistence::{AofLog, SyncPolicy};
use crate::protocol::RespValue;
use crate::storage::{now_ms, StorageEngine};
use bytes::Bytes;
use std::time::Instant;

/// Executes commands against the keyspace and the AOF.
///
/// Owns both: the handler is the single owning structure for all
/// process-wide state, threaded into the event loop by `&mut` reference.
#[derive(Debug)]
pub struct CommandHandler {
    /// The keyspace engine
    storage: StorageEngine,
    /// Append-only log of mutating commands
    aof: AofLog,
    /// Server start time for INFO
    start_time: Instant,
    /// Total commands dispatched (replay included)
    commands_processed: u64,
}

impl CommandHandler {
    /// Creates a handler with a fresh keyspace and the given AOF log.
    pub fn new(aof: AofLog) -> Self {
        Self {
            storage: StorageEngine::new(),
            aof,
            start_time: Instant::now(),
            commands_processed: 0,
        }
    }

    /// Executes a command frame and returns the response.
    ///
    /// Successful mutations are appended to the AOF.
    pub fn execute(&mut self, frame: RespValue) -> RespValue {
        self.execute_inner(frame, true)
    }

    /// Executes a replayed command frame with AOF writes suppressed.
    pub(crate) fn execute_replay(&mut self, frame: RespValue) -> RespValue {
        self.execute_inner(frame, false)
    }

    fn execute_inner(&mut self, frame: RespValue, log_mutations: bool) -> RespValue {
        self.commands_processed += 1;

        // Commands are non-null arrays whose elements are all non-null
        // bulk strings; any other shape is a protocol error.
        let args = match command_args(frame) {
            Ok(args) => args,
            Err(response) => return response,
        };
        if args.is_empty() {
            return RespValue::error("ERR missing command");
        }

        let name = String::from_utf8_lossy(&args[0]).to_uppercase();

        let response = match name.as_str() {
            "PING" => self.cmd_ping(&args),
            "ECHO" => self.cmd_echo(&args),
            "SET" => self.cmd_set(&args),
            "GET" => self.cmd_get(&args),
            "DEL" => self.cmd_del(&args),
            "CONFIG" => self.cmd_config(&args),
            "AOF" => self.cmd_aof(&args),
            "INFO" => self.cmd_info(&args),
            _ => RespValue::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(&args[0])
            )),
        };

        // The original frame, re-serialized, is byte-identical to its
        // canonical wire form: an array of bulk strings.
        if log_mutations
            && self.aof.is_enabled()
            && !response.is_error()
            && matches!(name.as_str(), "SET" | "DEL")
        {
            let frame = RespValue::Array(
                args.iter().cloned().map(RespValue::BulkString).collect(),
            );
            self.aof.append(&frame.serialize());
        }

        response
    }

    /// Runs one expiry sweep over the keyspace.
    ///
    /// Driven by the event loop's maintenance tick.
    pub fn sweep_expired(&mut self) -> usize {
        self.storage.sweep()
    }

    /// Gives the AOF a chance to fsync under the `everysec` policy.
    pub fn aof_tick(&mut self) {
        self.aof.maybe_sync();
    }

    // ========================================================================
    // Connection commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        match args.len() {
            1 => RespValue::pong(),
            2 => RespValue::BulkString(args[1].clone()),
            _ => wrong_args("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 2 {
            return wrong_args("ECHO");
        }
        RespValue::BulkString(args[1].clone())
    }

    // ========================================================================
    // Keyspace commands
    // ========================================================================

    /// SET key value [EX seconds | PX milliseconds]
    ///
    /// Options come in pairs and are case-insensitive. A plain SET drops
    /// any TTL the key had before.
    fn cmd_set(&mut self, args: &[Bytes]) -> RespValue {
        if args.len() < 3 {
            return wrong_args("SET");
        }

        let mut expires_at_ms = None;

        let mut i = 3;
        while i < args.len() {
            let opt = String::from_utf8_lossy(&args[i]).to_uppercase();
            if i + 1 >= args.len() {
                return RespValue::error("ERR syntax error");
            }

            let ttl: i64 = match std::str::from_utf8(&args[i + 1])
                .ok()
                .and_then(|s| s.parse().ok())
            {
                Some(n) => n,
                None => {
                    return RespValue::error("ERR value is not an integer or out of range")
                }
            };

            match opt.as_str() {
                "EX" => {
                    if ttl <= 0 {
                        return RespValue::error("ERR invalid expire time");
                    }
                    expires_at_ms = Some(now_ms() + ttl as u64 * 1000);
                }
                "PX" => {
                    if ttl <= 0 {
                        return RespValue::error("ERR invalid expire time");
                    }
                    expires_at_ms = Some(now_ms() + ttl as u64);
                }
                _ => return RespValue::error(format!("ERR unknown option '{}'", opt)),
            }
            i += 2;
        }

        self.storage
            .set(args[1].clone(), args[2].clone(), expires_at_ms);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&mut self, args: &[Bytes]) -> RespValue {
        if args.len() != 2 {
            return wrong_args("GET");
        }

        match self.storage.get(&args[1]) {
            Some(value) => RespValue::BulkString(value),
            None => RespValue::NullBulk,
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&mut self, args: &[Bytes]) -> RespValue {
        if args.len() < 2 {
            return wrong_args("DEL");
        }

        let removed = self.storage.del(&args[1..]);
        RespValue::integer(removed as i64)
    }

    // ========================================================================
    // Server commands
    // ========================================================================

    /// CONFIG SET parameter value / CONFIG GET parameter
    fn cmd_config(&mut self, args: &[Bytes]) -> RespValue {
        if args.len() < 2 {
            return wrong_args("CONFIG");
        }

        let sub = String::from_utf8_lossy(&args[1]).to_uppercase();
        match sub.as_str() {
            "SET" => {
                if args.len() != 4 {
                    return wrong_args("CONFIG");
                }
                let param = String::from_utf8_lossy(&args[2]).to_lowercase();
                let value = String::from_utf8_lossy(&args[3]).to_string();
                match param.as_str() {
                    "maxmemory" => match value.parse::<usize>() {
                        Ok(bytes) => {
                            self.storage.set_memory_limit(bytes);
                            RespValue::ok()
                        }
                        Err(_) => {
                            RespValue::error("ERR value is not an integer or out of range")
                        }
                    },
                    "appendfsync" => match value.parse::<SyncPolicy>() {
                        Ok(policy) => {
                            self.aof.set_policy(policy);
                            RespValue::ok()
                        }
                        Err(()) => RespValue::error(format!(
                            "ERR invalid appendfsync value '{}'",
                            value
                        )),
                    },
                    _ => RespValue::error(format!(
                        "ERR unknown configuration parameter '{}'",
                        param
                    )),
                }
            }
            "GET" => {
                if args.len() != 3 {
                    return wrong_args("CONFIG");
                }
                let param = String::from_utf8_lossy(&args[2]).to_lowercase();
                let value = match param.as_str() {
                    "maxmemory" => self.storage.memory().limit_bytes.to_string(),
                    "appendfsync" => self.aof.policy().as_str().to_string(),
                    _ => {
                        return RespValue::error(format!(
                            "ERR unknown configuration parameter '{}'",
                            param
                        ))
                    }
                };
                RespValue::array(vec![
                    RespValue::bulk_string(Bytes::from(param)),
                    RespValue::bulk_string(Bytes::from(value)),
                ])
            }
            _ => RespValue::error(format!("ERR unknown CONFIG subcommand '{}'", sub)),
        }
    }

    /// AOF ENABLE / AOF DISABLE
    fn cmd_aof(&mut self, args: &[Bytes]) -> RespValue {
        if args.len() != 2 {
            return wrong_args("AOF");
        }

        let sub = String::from_utf8_lossy(&args[1]).to_uppercase();
        match sub.as_str() {
            "ENABLE" => match self.aof.enable() {
                Ok(()) => RespValue::ok(),
                Err(e) => RespValue::error(format!("ERR can't open AOF file: {}", e)),
            },
            "DISABLE" => {
                self.aof.disable();
                RespValue::ok()
            }
            _ => RespValue::error(format!("ERR unknown AOF subcommand '{}'", sub)),
        }
    }

    /// INFO
    fn cmd_info(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return wrong_args("INFO");
        }

        let memory = self.storage.memory();
        let uptime = self.start_time.elapsed().as_secs();

        let info = format!(
            "# Server\r\n\
             uptime_in_seconds:{}\r\n\
             total_commands_processed:{}\r\n\
             \r\n\
             # Memory\r\n\
             used_memory:{}\r\n\
             maxmemory:{}\r\n\
             evicted_keys:{}\r\n\
             \r\n\
             # Persistence\r\n\
             aof_enabled:{}\r\n\
             appendfsync:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             db0:keys={},expires={}\r\n\
             expired_keys:{}\r\n",
            uptime,
            self.commands_processed,
            memory.estimated_bytes,
            memory.limit_bytes,
            memory.evictions_total,
            if self.aof.is_enabled() { 1 } else { 0 },
            self.aof.policy().as_str(),
            self.storage.len(),
            self.storage.expiring_len(),
            self.storage.expired_total(),
        );

        RespValue::bulk_string(Bytes::from(info))
    }
}

/// Validates the dispatcher input contract and unwraps the argument list.
fn command_args(frame: RespValue) -> Result<Vec<Bytes>, RespValue> {
    let items = match frame {
        RespValue::Array(items) => items,
        _ => return Err(RespValue::error("ERR protocol error: expected array")),
    };

    let mut args = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(bytes) => args.push(bytes),
            _ => {
                return Err(RespValue::error(
                    "ERR protocol error: arguments must be bulk strings",
                ))
            }
        }
    }
    Ok(args)
}

fn wrong_args(cmd: &str) -> RespValue {
    RespValue::error(format!("ERR wrong number of arguments for '{}'", cmd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::AofLog;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn temp_path() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("sparkkv_cmd_{}_{}.aof", std::process::id(), n))
    }

    fn create_handler() -> CommandHandler {
        CommandHandler::new(AofLog::new(temp_path()))
    }

    fn make_command(args: &[&str]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|s| RespValue::bulk_string(Bytes::copy_from_slice(s.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn test_ping() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["PING"]));
        assert_eq!(response, RespValue::simple_string("PONG"));

        let response = handler.execute(make_command(&["PING", "hello"]));
        assert_eq!(response, RespValue::bulk_string(Bytes::from("hello")));

        let response = handler.execute(make_command(&["PING", "a", "b"]));
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'PING'")
        );
    }

    #[test]
    fn test_echo() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["ECHO", "hello"]));
        assert_eq!(response, RespValue::bulk_string(Bytes::from("hello")));

        let response = handler.execute(make_command(&["ECHO"]));
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'ECHO'")
        );
    }

    #[test]
    fn test_set_get() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["SET", "key", "value"]));
        assert_eq!(response, RespValue::ok());

        let response = handler.execute(make_command(&["GET", "key"]));
        assert_eq!(response, RespValue::bulk_string(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["GET", "nonexistent"]));
        assert_eq!(response, RespValue::NullBulk);
    }

    #[test]
    fn test_command_names_are_case_insensitive() {
        let mut handler = create_handler();

        assert_eq!(handler.execute(make_command(&["set", "k", "v"])), RespValue::ok());
        assert_eq!(
            handler.execute(make_command(&["gEt", "k"])),
            RespValue::bulk_string(Bytes::from("v"))
        );
    }

    #[test]
    fn test_set_with_px_expiry() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["SET", "k", "v", "PX", "50"]));
        assert_eq!(response, RespValue::ok());
        assert_eq!(
            handler.execute(make_command(&["GET", "k"])),
            RespValue::bulk_string(Bytes::from("v"))
        );

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(handler.execute(make_command(&["GET", "k"])), RespValue::NullBulk);
    }

    #[test]
    fn test_set_with_ex_expiry_stays_alive() {
        let mut handler = create_handler();

        // Options are case-insensitive.
        let response = handler.execute(make_command(&["SET", "k", "v", "ex", "100"]));
        assert_eq!(response, RespValue::ok());
        assert_eq!(
            handler.execute(make_command(&["GET", "k"])),
            RespValue::bulk_string(Bytes::from("v"))
        );
    }

    #[test]
    fn test_set_invalid_expire_time() {
        let mut handler = create_handler();

        for ttl in ["0", "-5"] {
            let response = handler.execute(make_command(&["SET", "k", "v", "EX", ttl]));
            assert_eq!(response, RespValue::error("ERR invalid expire time"));
        }
    }

    #[test]
    fn test_set_malformed_ttl() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["SET", "k", "v", "PX", "soon"]));
        assert_eq!(
            response,
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_set_unknown_option() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["SET", "k", "v", "NX", "1"]));
        assert_eq!(response, RespValue::error("ERR unknown option 'NX'"));
    }

    #[test]
    fn test_set_dangling_option() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["SET", "k", "v", "EX"]));
        assert_eq!(response, RespValue::error("ERR syntax error"));
    }

    #[test]
    fn test_set_overwrites_and_clears_ttl() {
        let mut handler = create_handler();

        handler.execute(make_command(&["SET", "k", "v1", "PX", "50"]));
        handler.execute(make_command(&["SET", "k", "v2"]));

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(
            handler.execute(make_command(&["GET", "k"])),
            RespValue::bulk_string(Bytes::from("v2"))
        );
    }

    #[test]
    fn test_del() {
        let mut handler = create_handler();

        handler.execute(make_command(&["SET", "key1", "value1"]));
        handler.execute(make_command(&["SET", "key2", "value2"]));

        let response = handler.execute(make_command(&["DEL", "key1", "key2", "key3"]));
        assert_eq!(response, RespValue::integer(2));
    }

    #[test]
    fn test_del_empty_store() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["DEL", "x", "y"]));
        assert_eq!(response, RespValue::integer(0));
    }

    #[test]
    fn test_del_arity() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["DEL"]));
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'DEL'")
        );
    }

    #[test]
    fn test_unknown_command_echoes_original_case() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["FlushAll"]));
        assert_eq!(response, RespValue::error("ERR unknown command 'FlushAll'"));
    }

    #[test]
    fn test_rejects_non_array_frames() {
        let mut handler = create_handler();

        for frame in [
            RespValue::integer(7),
            RespValue::simple_string("PING"),
            RespValue::NullArray,
        ] {
            let response = handler.execute(frame);
            assert_eq!(response, RespValue::error("ERR protocol error: expected array"));
        }
    }

    #[test]
    fn test_rejects_non_bulk_arguments() {
        let mut handler = create_handler();

        let frame = RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::integer(1),
        ]);
        let response = handler.execute(frame);
        assert_eq!(
            response,
            RespValue::error("ERR protocol error: arguments must be bulk strings")
        );

        let frame = RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::NullBulk,
        ]);
        let response = handler.execute(frame);
        assert_eq!(
            response,
            RespValue::error("ERR protocol error: arguments must be bulk strings")
        );
    }

    #[test]
    fn test_empty_command_array() {
        let mut handler = create_handler();

        let response = handler.execute(RespValue::Array(vec![]));
        assert_eq!(response, RespValue::error("ERR missing command"));
    }

    #[test]
    fn test_config_maxmemory() {
        let mut handler = create_handler();

        let response =
            handler.execute(make_command(&["CONFIG", "SET", "maxmemory", "1048576"]));
        assert_eq!(response, RespValue::ok());

        let response = handler.execute(make_command(&["CONFIG", "GET", "maxmemory"]));
        assert_eq!(
            response,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("maxmemory")),
                RespValue::bulk_string(Bytes::from("1048576")),
            ])
        );
    }

    #[test]
    fn test_config_appendfsync() {
        let mut handler = create_handler();

        let response =
            handler.execute(make_command(&["CONFIG", "SET", "appendfsync", "no"]));
        assert_eq!(response, RespValue::ok());

        let response = handler.execute(make_command(&["CONFIG", "GET", "appendfsync"]));
        assert_eq!(
            response,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("appendfsync")),
                RespValue::bulk_string(Bytes::from("no")),
            ])
        );

        let response =
            handler.execute(make_command(&["CONFIG", "SET", "appendfsync", "always"]));
        assert_eq!(
            response,
            RespValue::error("ERR invalid appendfsync value 'always'")
        );
    }

    #[test]
    fn test_config_unknown_parameter() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["CONFIG", "GET", "save"]));
        assert_eq!(
            response,
            RespValue::error("ERR unknown configuration parameter 'save'")
        );

        let response = handler.execute(make_command(&["CONFIG", "SET", "save", "60"]));
        assert_eq!(
            response,
            RespValue::error("ERR unknown configuration parameter 'save'")
        );
    }

    #[test]
    fn test_config_bad_maxmemory_value() {
        let mut handler = create_handler();

        let response =
            handler.execute(make_command(&["CONFIG", "SET", "maxmemory", "lots"]));
        assert_eq!(
            response,
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_info_contains_required_fields() {
        let mut handler = create_handler();
        handler.execute(make_command(&["SET", "k", "v"]));

        let response = handler.execute(make_command(&["INFO"]));
        let RespValue::BulkString(body) = response else {
            panic!("INFO must return a bulk string");
        };
        let text = std::str::from_utf8(&body).unwrap();

        for field in ["used_memory:", "maxmemory:", "evicted_keys:", "aof_enabled:0"] {
            assert!(text.contains(field), "INFO missing {}", field);
        }
        assert!(text.contains("db0:keys=1,expires=0"));
    }

    #[test]
    fn test_info_rejects_section_argument() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["INFO", "memory"]));
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'INFO'")
        );
    }

    #[test]
    fn test_aof_logs_mutations_only() {
        let path = temp_path();
        let mut handler = CommandHandler::new(AofLog::new(&path));

        assert_eq!(handler.execute(make_command(&["AOF", "ENABLE"])), RespValue::ok());

        handler.execute(make_command(&["SET", "a", "1"]));
        handler.execute(make_command(&["GET", "a"]));
        handler.execute(make_command(&["PING"]));
        handler.execute(make_command(&["DEL", "a"]));
        // Failed mutations are not logged either.
        handler.execute(make_command(&["SET", "b", "v", "EX", "0"]));

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(
            contents,
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\nDEL\r\n$1\r\na\r\n"
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_aof_disable_stops_logging() {
        let path = temp_path();
        let mut handler = CommandHandler::new(AofLog::new(&path));

        handler.execute(make_command(&["AOF", "ENABLE"]));
        handler.execute(make_command(&["SET", "a", "1"]));
        handler.execute(make_command(&["AOF", "DISABLE"]));
        handler.execute(make_command(&["SET", "b", "2"]));

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_aof_unknown_subcommand() {
        let mut handler = create_handler();

        let response = handler.execute(make_command(&["AOF", "REWRITE"]));
        assert_eq!(response, RespValue::error("ERR unknown AOF subcommand 'REWRITE'"));
    }
}
