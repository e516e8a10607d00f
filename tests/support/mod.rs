//! Scripted stand-in for OpenOCD's TCL server
//!
//! Interprets the subset of commands the client sends against an in-memory
//! target model, over a real TCP socket.

#![allow(dead_code)]

use openocd_rpc::Config;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TERMINATOR: u8 = 0x1a;

/// What a function does when the core is resumed at its address
#[derive(Debug, Clone, Copy)]
pub enum FakeFunction {
    /// Put the value in r0 and return through lr
    Return(u32),
    /// Never return
    Hang,
    /// Halt with a garbage completion flag
    CorruptFlag,
    /// Keep running and leave a garbage completion flag behind
    RunAwayCorruptFlag,
}

/// State observed at the moment a function was entered
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub address: u32,
    pub args: [u32; 4],
    pub lr: u32,
    pub breakpoints: Vec<u32>,
    pub hooks: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FakeTarget {
    pub state: String,
    pub registers: HashMap<String, u32>,
    pub memory: HashMap<u32, u32>,
    pub unreadable: BTreeSet<u32>,
    pub vars: HashMap<String, String>,
    pub arrays: HashMap<String, BTreeMap<usize, u32>>,
    pub breakpoints: BTreeSet<u32>,
    pub events: HashMap<String, String>,
    pub functions: HashMap<u32, FakeFunction>,
    pub calls: Vec<RecordedCall>,
    pub log: Vec<String>,
    /// Close the socket without replying to the first command with this prefix
    pub hangup_on: Option<String>,
}

impl FakeTarget {
    /// A halted Cortex-M core stopped at 0x08000400
    pub fn halted() -> Self {
        let registers = [
            ("pc", 0x0800_0400),
            ("lr", 0x0800_0301),
            ("sp", 0x2000_1000),
            ("r0", 10),
            ("r1", 11),
            ("r2", 12),
            ("r3", 13),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        Self {
            state: "halted".to_string(),
            registers,
            ..Self::default()
        }
    }

    pub fn with_function(mut self, address: u32, function: FakeFunction) -> Self {
        self.functions.insert(address, function);
        self
    }

    pub fn reg(&self, name: &str) -> u32 {
        self.registers[name]
    }

    /// Commands matching `prefix`
    pub fn sent(&self, prefix: &str) -> Vec<String> {
        self.log.iter().filter(|c| c.starts_with(prefix)).cloned().collect()
    }

    /// Event bodies that would still do something on a halt
    pub fn active_hooks(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|(_, body)| !body.is_empty())
            .map(|(event, _)| event.clone())
            .collect()
    }

    fn handle(&mut self, command: &str) -> String {
        self.log.push(command.to_string());
        self.execute(command)
    }

    fn execute(&mut self, command: &str) -> String {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.as_slice() {
            ["exit"] => String::new(),
            [_, "curstate"] => self.state.clone(),
            [_, "configure", "-event", event, ..] => {
                self.events.insert(event.to_string(), braced(command));
                String::new()
            }
            ["halt"] => {
                if self.state != "halted" {
                    self.state = "halted".to_string();
                    self.fire("halted");
                }
                String::new()
            }
            ["resume"] => self.resume(),
            ["reset", "halt"] => {
                self.state = "halted".to_string();
                String::new()
            }
            ["reset", "run"] => {
                self.state = "running".to_string();
                String::new()
            }
            ["reg", name, "force"] => match self.registers.get(*name) {
                Some(value) => format!("{} (/32): 0x{:08x}", name, value),
                None => format!("invalid command name \"{}\"", name),
            },
            ["reg", name, value] => {
                let value = number(value);
                self.registers.insert(name.to_string(), value);
                format!("{} (/32): 0x{:08x}", name, value)
            }
            ["mdw", address] => {
                let address = number(address);
                if self.unreadable.contains(&address) {
                    format!("error reading target memory at 0x{:08x}", address)
                } else {
                    let value = self.memory.get(&address).copied().unwrap_or(0);
                    format!("0x{:08x}: {:08x} ", address, value)
                }
            }
            ["mww", address, value] => {
                self.memory.insert(number(address), number(value));
                String::new()
            }
            ["array", "unset", name] => {
                self.arrays.remove(*name);
                String::new()
            }
            ["array", "set", name, ..] => {
                let body = braced(command);
                let items: Vec<&str> = body.split_whitespace().collect();
                let array = items
                    .chunks_exact(2)
                    .map(|pair| (pair[0].parse::<usize>().unwrap(), number(pair[1])))
                    .collect();
                self.arrays.insert(name.to_string(), array);
                String::new()
            }
            ["array", "get", name] => match self.arrays.get(*name) {
                // reversed, to make sure the client sorts by index
                Some(array) => array
                    .iter()
                    .rev()
                    .map(|(index, value)| format!("{} {}", index, value))
                    .collect::<Vec<_>>()
                    .join(" "),
                None => String::new(),
            },
            ["mem2array", name, width, address, count] => {
                let (step, address, count) = transfer(width, address, count);
                let addresses: Vec<u32> = (0..count).map(|i| address + i as u32 * step).collect();
                if addresses.iter().any(|a| self.unreadable.contains(a)) {
                    return "mem2array: Read @ 0x0, w=4, cnt=1, failed".to_string();
                }
                let array = addresses
                    .iter()
                    .enumerate()
                    .map(|(i, a)| (i, self.memory.get(a).copied().unwrap_or(0)))
                    .collect();
                self.arrays.insert(name.to_string(), array);
                String::new()
            }
            ["array2mem", name, width, address, count] => {
                let mask = match number(width) {
                    8 => 0xff,
                    16 => 0xffff,
                    _ => u32::MAX,
                };
                let (step, address, count) = transfer(width, address, count);
                let array = self.arrays.get(*name).cloned().unwrap_or_default();
                for i in 0..count {
                    let value = array.get(&i).copied().unwrap_or(0) & mask;
                    self.memory.insert(address + i as u32 * step, value);
                }
                String::new()
            }
            ["bp", address, _length, "hw"] => {
                let address = number(address);
                self.breakpoints.insert(address);
                format!("breakpoint set at 0x{:08x}", address)
            }
            ["rbp", address] => {
                self.breakpoints.remove(&number(address));
                String::new()
            }
            ["set", name] => match self.vars.get(*name) {
                Some(value) => value.clone(),
                None => format!("can't read \"{}\": no such variable", name),
            },
            ["set", name, value] => {
                self.vars.insert(name.to_string(), value.to_string());
                value.to_string()
            }
            _ => format!("invalid command name \"{}\"", tokens.first().unwrap_or(&"")),
        }
    }

    fn resume(&mut self) -> String {
        if self.state != "halted" {
            return "target not halted".to_string();
        }

        let pc = self.reg("pc");
        let Some(function) = self.functions.get(&pc).copied() else {
            self.state = "running".to_string();
            return String::new();
        };

        self.calls.push(RecordedCall {
            address: pc,
            args: [self.reg("r0"), self.reg("r1"), self.reg("r2"), self.reg("r3")],
            lr: self.reg("lr"),
            breakpoints: self.breakpoints.iter().copied().collect(),
            hooks: self.events.clone(),
        });

        match function {
            FakeFunction::Return(value) => {
                let return_address = self.reg("lr") & !1;
                self.registers.insert("r0".to_string(), value);
                for scratch in ["r1", "r2", "r3"] {
                    self.registers.insert(scratch.to_string(), 0xbad0_0000);
                }
                self.registers.insert("lr".to_string(), 0xffff_fff9);
                self.registers.insert("pc".to_string(), return_address);

                if self.breakpoints.contains(&return_address) {
                    self.state = "halted".to_string();
                    self.fire("halted");
                } else {
                    self.state = "running".to_string();
                }
            }
            FakeFunction::Hang => {
                self.state = "running".to_string();
            }
            FakeFunction::CorruptFlag => {
                self.state = "halted".to_string();
                self.vars.insert("call_done".to_string(), "garbage".to_string());
            }
            FakeFunction::RunAwayCorruptFlag => {
                self.state = "running".to_string();
                self.vars.insert("call_done".to_string(), "garbage".to_string());
            }
        }
        String::new()
    }

    fn fire(&mut self, event: &str) {
        let Some(body) = self.events.get(event).cloned() else {
            return;
        };
        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.execute(part);
        }
    }
}

fn braced(command: &str) -> String {
    match (command.find('{'), command.rfind('}')) {
        (Some(start), Some(end)) if start < end => command[start + 1..end].trim().to_string(),
        _ => String::new(),
    }
}

fn number(s: &str) -> u32 {
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).unwrap(),
        None => s.parse().unwrap(),
    }
}

fn transfer(width: &str, address: &str, count: &str) -> (u32, u32, usize) {
    (number(width) / 8, number(address), count.parse().unwrap())
}

/// A fake TCL server bound to an ephemeral localhost port
pub struct FakeOpenocd {
    pub addr: SocketAddr,
    target: Arc<Mutex<FakeTarget>>,
}

impl FakeOpenocd {
    pub async fn start(target: FakeTarget) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let target = Arc::new(Mutex::new(target));

        let shared = target.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        Self { addr, target }
    }

    pub fn config(&self) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            response_timeout_ms: 2_000,
            poll_interval_ms: 1,
            ..Config::default()
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeTarget) -> R) -> R {
        f(&mut self.target.lock().unwrap())
    }
}

async fn serve(mut socket: TcpStream, target: Arc<Mutex<FakeTarget>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(pos) = buf.iter().position(|&b| b == TERMINATOR) {
            let frame: Vec<u8> = buf.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&frame[..frame.len() - 1]).to_string();

            let (response, close) = {
                let mut target = target.lock().unwrap();
                let response = target.handle(&command);
                let close = match &target.hangup_on {
                    Some(prefix) => command.trim().starts_with(prefix.as_str()),
                    None => false,
                };
                (response, close)
            };
            if close {
                return;
            }

            let mut out = response.into_bytes();
            out.push(b'\n');
            out.push(TERMINATOR);
            if socket.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}
