//! In-process binary-protocol cache server for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use pipecache::ops::sort_range::{encode_response, SortRangeCommand};
use pipecache::protocol::status::wire;
use pipecache::protocol::{Frame, Opcode, OperationStatus, REQ_MAGIC};
use pipecache::smget::{BKey, SMGetElement, ShardSortResult};
use pipecache::{CachedData, ClientConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Item {
    flags: u32,
    data: Bytes,
    cas: u64,
}

#[derive(Default)]
struct State {
    items: HashMap<String, Item>,
    collections: HashMap<String, BTreeMap<BKey, CachedData>>,
    next_cas: u64,
    opcodes: Vec<u8>,
    credentials: Option<(String, String)>,
    hold_sort_range: bool,
}

pub struct FakeServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<State>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with_credentials(None).await
    }

    /// Requires SASL PLAIN with the given user and password.
    pub async fn start_with_credentials(credentials: Option<(&str, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("no local addr");
        let state = Arc::new(Mutex::new(State {
            credentials: credentials.map(|(u, p)| (u.to_string(), p.to_string())),
            next_cas: 1,
            ..Default::default()
        }));

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(serve_connection(stream, state));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn config(&self) -> ClientConfig {
        config_for(&[self])
    }

    /// Seeds a sorted collection under `key`.
    pub fn add_collection(&self, key: &str, elements: &[(u64, &str)]) {
        let collection = elements
            .iter()
            .map(|(bkey, value)| {
                (
                    BKey::Long(*bkey),
                    CachedData::new(0, value.as_bytes().to_vec()),
                )
            })
            .collect();
        self.state
            .lock()
            .collections
            .insert(key.to_string(), collection);
    }

    /// Stops answering sort-range requests.
    pub fn hold_sort_range(&self) {
        self.state.lock().hold_sort_range = true;
    }

    pub fn item(&self, key: &str) -> Option<Bytes> {
        self.state.lock().items.get(key).map(|item| item.data.clone())
    }

    /// Number of requests seen with `opcode`.
    pub fn seen(&self, opcode: Opcode) -> usize {
        self.state
            .lock()
            .opcodes
            .iter()
            .filter(|op| **op == opcode.as_u8())
            .count()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn config_for(servers: &[&FakeServer]) -> ClientConfig {
    ClientConfig {
        servers: servers.iter().map(|s| s.addr.to_string()).collect(),
        op_timeout_ms: 2_000,
        connect_timeout_ms: 1_000,
        max_reconnect_delay_ms: 200,
        ..Default::default()
    }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut authenticated = state.lock().credentials.is_none();
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let mut out = BytesMut::new();
        loop {
            let frame = match Frame::parse(&mut buf, REQ_MAGIC) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => return,
            };
            let responses = handle(&state, &frame, &mut authenticated);
            for response in responses {
                response.encode(&mut out);
            }
        }
        if !out.is_empty() && stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn reply(frame: &Frame, status: u16, extras: Bytes, key: Bytes, value: Bytes, cas: u64) -> Frame {
    let opcode = frame.header.opcode().unwrap_or(Opcode::NoOp);
    Frame::response(opcode, status, extras, key, value, frame.header.opaque, cas)
}

fn status_only(frame: &Frame, status: u16) -> Frame {
    let body = if status == wire::NO_ERROR {
        Bytes::new()
    } else {
        Bytes::from(OperationStatus::from_wire(status, &[]).message().to_string())
    };
    reply(frame, status, Bytes::new(), Bytes::new(), body, 0)
}

fn handle(state: &Mutex<State>, frame: &Frame, authenticated: &mut bool) -> Vec<Frame> {
    let opcode = match frame.header.opcode() {
        Some(opcode) => opcode,
        None => return vec![status_only(frame, wire::UNKNOWN_COMMAND)],
    };
    let mut state = state.lock();
    state.opcodes.push(opcode.as_u8());

    if opcode == Opcode::SaslAuth {
        let expected = state.credentials.as_ref().map(|(user, pass)| {
            let mut payload = vec![0u8];
            payload.extend_from_slice(user.as_bytes());
            payload.push(0);
            payload.extend_from_slice(pass.as_bytes());
            payload
        });
        let ok = expected.map_or(true, |expected| frame.value[..] == expected[..]);
        *authenticated = ok;
        let status = if ok { wire::NO_ERROR } else { wire::AUTH_ERROR };
        return vec![status_only(frame, status)];
    }
    if !*authenticated {
        return vec![status_only(frame, wire::AUTH_ERROR)];
    }

    let key = String::from_utf8_lossy(&frame.key).into_owned();
    match opcode {
        Opcode::Get | Opcode::GetK | Opcode::GetQ | Opcode::GetKQ => {
            let quiet = matches!(opcode, Opcode::GetQ | Opcode::GetKQ);
            let with_key = matches!(opcode, Opcode::GetK | Opcode::GetKQ);
            match state.items.get(&key) {
                Some(item) => {
                    let mut extras = BytesMut::new();
                    extras.put_u32(item.flags);
                    let key = if with_key {
                        frame.key.clone()
                    } else {
                        Bytes::new()
                    };
                    vec![reply(
                        frame,
                        wire::NO_ERROR,
                        extras.freeze(),
                        key,
                        item.data.clone(),
                        item.cas,
                    )]
                }
                None if quiet => Vec::new(),
                None => vec![status_only(frame, wire::KEY_NOT_FOUND)],
            }
        }
        Opcode::Set
        | Opcode::Add
        | Opcode::Replace
        | Opcode::SetQ
        | Opcode::AddQ
        | Opcode::ReplaceQ => {
            let quiet = matches!(opcode, Opcode::SetQ | Opcode::AddQ | Opcode::ReplaceQ);
            let mut extras = &frame.extras[..];
            let flags = if extras.remaining() >= 4 { extras.get_u32() } else { 0 };
            let exists = state.items.get(&key).map(|item| item.cas);
            let status = match (opcode, exists) {
                (Opcode::Add | Opcode::AddQ, Some(_)) => wire::KEY_EXISTS,
                (Opcode::Replace | Opcode::ReplaceQ, None) => wire::ITEM_NOT_STORED,
                (_, current) if frame.header.cas != 0 => match current {
                    None => wire::KEY_NOT_FOUND,
                    Some(cas) if cas != frame.header.cas => wire::KEY_EXISTS,
                    Some(_) => wire::NO_ERROR,
                },
                _ => wire::NO_ERROR,
            };
            if status != wire::NO_ERROR {
                return vec![status_only(frame, status)];
            }
            let cas = state.next_cas;
            state.next_cas += 1;
            state.items.insert(
                key,
                Item {
                    flags,
                    data: frame.value.clone(),
                    cas,
                },
            );
            if quiet {
                Vec::new()
            } else {
                vec![reply(frame, wire::NO_ERROR, Bytes::new(), Bytes::new(), Bytes::new(), cas)]
            }
        }
        Opcode::Append | Opcode::Prepend => match state.items.get_mut(&key) {
            Some(item) => {
                let mut data = BytesMut::new();
                if opcode == Opcode::Append {
                    data.put_slice(&item.data);
                    data.put_slice(&frame.value);
                } else {
                    data.put_slice(&frame.value);
                    data.put_slice(&item.data);
                }
                item.data = data.freeze();
                vec![status_only(frame, wire::NO_ERROR)]
            }
            None => vec![status_only(frame, wire::ITEM_NOT_STORED)],
        },
        Opcode::Delete => match state.items.remove(&key) {
            Some(_) => vec![status_only(frame, wire::NO_ERROR)],
            None => vec![status_only(frame, wire::KEY_NOT_FOUND)],
        },
        Opcode::Increment | Opcode::Decrement => {
            let mut extras = &frame.extras[..];
            let by = extras.get_u64();
            let initial = extras.get_u64();
            let exptime = extras.get_u32();
            let next = match state.items.get(&key) {
                Some(item) => match std::str::from_utf8(&item.data)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    Some(current) if opcode == Opcode::Increment => current.wrapping_add(by),
                    Some(current) => current.saturating_sub(by),
                    None => return vec![status_only(frame, wire::NON_NUMERIC)],
                },
                None if exptime == 0xffff_ffff => {
                    return vec![status_only(frame, wire::KEY_NOT_FOUND)]
                }
                None => initial,
            };
            let cas = state.next_cas;
            state.next_cas += 1;
            state.items.insert(
                key,
                Item {
                    flags: 0,
                    data: Bytes::from(next.to_string()),
                    cas,
                },
            );
            let mut value = BytesMut::new();
            value.put_u64(next);
            vec![reply(frame, wire::NO_ERROR, Bytes::new(), Bytes::new(), value.freeze(), cas)]
        }
        Opcode::Flush => {
            state.items.clear();
            vec![status_only(frame, wire::NO_ERROR)]
        }
        Opcode::NoOp => vec![status_only(frame, wire::NO_ERROR)],
        Opcode::Version => vec![reply(
            frame,
            wire::NO_ERROR,
            Bytes::new(),
            Bytes::new(),
            Bytes::from_static(b"1.6.21-fake"),
            0,
        )],
        Opcode::SortRange => {
            if state.hold_sort_range {
                return Vec::new();
            }
            match SortRangeCommand::parse_request(&frame.extras, &frame.value) {
                Ok(command) => sort_range(&state, frame, &command),
                Err(_) => vec![status_only(frame, wire::INVALID_ARGUMENTS)],
            }
        }
        _ => vec![status_only(frame, wire::UNKNOWN_COMMAND)],
    }
}

fn sort_range(state: &State, frame: &Frame, command: &SortRangeCommand) -> Vec<Frame> {
    let range = command.range();
    let reverse = range.is_reverse();
    let (low, high) = if reverse {
        (&range.to, &range.from)
    } else {
        (&range.from, &range.to)
    };

    let mut shard = ShardSortResult::default();
    let mut found_any = false;
    for key in command.keys() {
        match state.collections.get(key) {
            Some(collection) => {
                found_any = true;
                shard.elements.extend(
                    collection
                        .range(low.clone()..=high.clone())
                        .map(|(bkey, value)| SMGetElement::new(key.clone(), bkey.clone(), value.clone())),
                );
            }
            None => shard.missed.push((
                key.clone(),
                OperationStatus::from_wire(wire::KEY_NOT_FOUND, &[]),
            )),
        }
    }
    if !found_any {
        return vec![status_only(frame, wire::KEY_NOT_FOUND)];
    }

    shard.elements.sort_by(|a, b| a.compare(b, reverse));
    if command.mode().is_unique() {
        shard.elements.dedup_by(|next, kept| next.bkey == kept.bkey);
    }
    shard.elements.truncate(command.count() as usize);
    vec![reply(
        frame,
        wire::NO_ERROR,
        Bytes::new(),
        Bytes::new(),
        encode_response(&shard),
        0,
    )]
}
