//! Test doubles for the host and the native engines

use crate::builder::InterfaceRequest;
use crate::host::{TunDescriptor, VpnHost};
use crate::native::{OpenVpnClient, StopSignal, WireGuardAbi};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fs::File;
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const WG_CONFIG: &str = "[Interface]\n\
    PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\
    Address = 10.8.0.2/32\n\
    DNS = 10.0.0.1\n\
    [Peer]\n\
    PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n\
    AllowedIPs = 0.0.0.0/0\n\
    Endpoint = 203.0.113.7:51820\n";

/// Ordered record of host and engine calls, shared between fakes
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn last_position(&self, event: &str) -> Option<usize> {
        self.events().iter().rposition(|e| e == event)
    }
}

/// Poll `f` for up to two seconds
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn null_fd() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").unwrap())
}

/// Descriptor whose release sets the returned flag
pub fn test_descriptor() -> (TunDescriptor, Flag) {
    let released = Flag::default();
    let flag = released.clone();
    (TunDescriptor::with_close_hook(null_fd(), move || flag.set()), released)
}

pub struct FakeHost {
    permission: AtomicBool,
    brand: String,
    refuse: AtomicBool,
    requests: Mutex<Vec<InterfaceRequest>>,
    established: AtomicUsize,
    released: Arc<AtomicUsize>,
    protected: Mutex<Vec<RawFd>>,
    permission_requests: AtomicUsize,
    foreground: AtomicBool,
    log: EventLog,
    gate: Option<(Sender<()>, Receiver<()>)>,
    permission_hook: Mutex<Option<PermissionHook>>,
}

type PermissionHook = Box<dyn FnOnce() + Send>;

impl FakeHost {
    pub fn new(brand: &str) -> Self {
        Self::build(brand, EventLog::default(), None)
    }

    pub fn with_log(brand: &str, log: EventLog) -> Self {
        Self::build(brand, log, None)
    }

    /// Host whose `establish` signals the first receiver on entry and then
    /// blocks until the sender fires
    pub fn gated(brand: &str) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = unbounded();
        let (proceed_tx, proceed_rx) = unbounded();
        let host = Self::build(brand, EventLog::default(), Some((entered_tx, proceed_rx)));
        (host, entered_rx, proceed_tx)
    }

    fn build(brand: &str, log: EventLog, gate: Option<(Sender<()>, Receiver<()>)>) -> Self {
        Self {
            permission: AtomicBool::new(true),
            brand: brand.to_string(),
            refuse: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            established: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            protected: Mutex::new(Vec::new()),
            permission_requests: AtomicUsize::new(0),
            foreground: AtomicBool::new(false),
            log,
            gate,
            permission_hook: Mutex::new(None),
        }
    }

    /// Run `hook` inside the next permission check
    pub fn on_permission_check(&self, hook: impl FnOnce() + Send + 'static) {
        *self.permission_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn refuse_establish(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<InterfaceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn established(&self) -> usize {
        self.established.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn protected(&self) -> Vec<RawFd> {
        self.protected.lock().unwrap().clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn in_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }
}

impl VpnHost for FakeHost {
    fn has_permission(&self) -> bool {
        let hook = self.permission_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.permission.load(Ordering::SeqCst)
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn establish(&self, request: &InterfaceRequest) -> Option<TunDescriptor> {
        self.requests.lock().unwrap().push(request.clone());
        self.log.push("host:establish");

        if let Some((entered, proceed)) = &self.gate {
            let _ = entered.send(());
            let _ = proceed.recv();
        }
        if self.refuse.load(Ordering::SeqCst) {
            return None;
        }

        self.established.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        let log = self.log.clone();
        Some(TunDescriptor::with_close_hook(null_fd(), move || {
            released.fetch_add(1, Ordering::SeqCst);
            log.push("host:release");
        }))
    }

    fn protect(&self, fd: RawFd) -> io::Result<()> {
        self.protected.lock().unwrap().push(fd);
        Ok(())
    }

    fn device_brand(&self) -> String {
        self.brand.clone()
    }

    fn enter_foreground(&self) {
        self.foreground.store(true, Ordering::SeqCst);
    }

    fn leave_foreground(&self) {
        self.foreground.store(false, Ordering::SeqCst);
    }
}

pub struct FakeWireGuardAbi {
    next_handle: AtomicI32,
    reject: Option<i32>,
    ifname: Mutex<Option<String>>,
    settings: Mutex<Option<String>>,
    runtime: Mutex<Option<String>>,
    sockets: Mutex<(i32, i32)>,
    log: EventLog,
}

impl FakeWireGuardAbi {
    pub fn new() -> Self {
        Self::build(None, EventLog::default())
    }

    pub fn rejecting(code: i32) -> Self {
        Self::build(Some(code), EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self::build(None, log)
    }

    fn build(reject: Option<i32>, log: EventLog) -> Self {
        Self {
            next_handle: AtomicI32::new(0),
            reject,
            ifname: Mutex::new(None),
            settings: Mutex::new(None),
            runtime: Mutex::new(None),
            sockets: Mutex::new((-1, -1)),
            log,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.events()
    }

    pub fn last_ifname(&self) -> Option<String> {
        self.ifname.lock().unwrap().clone()
    }

    pub fn last_settings(&self) -> Option<String> {
        self.settings.lock().unwrap().clone()
    }

    pub fn set_runtime_config(&self, dump: &str) {
        *self.runtime.lock().unwrap() = Some(dump.to_string());
    }

    pub fn set_sockets(&self, v4: i32, v6: i32) {
        *self.sockets.lock().unwrap() = (v4, v6);
    }
}

impl WireGuardAbi for FakeWireGuardAbi {
    fn turn_on(&self, ifname: &str, tun_fd: RawFd, settings: &str) -> i32 {
        assert!(tun_fd >= 0);
        self.log.push("wg:turn_on");
        *self.ifname.lock().unwrap() = Some(ifname.to_string());
        *self.settings.lock().unwrap() = Some(settings.to_string());
        match self.reject {
            Some(code) => code,
            None => self.next_handle.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn turn_off(&self, _handle: i32) {
        self.log.push("wg:turn_off");
    }

    fn runtime_config(&self, _handle: i32) -> Option<String> {
        self.runtime.lock().unwrap().clone()
    }

    fn socket_v4(&self, _handle: i32) -> i32 {
        self.sockets.lock().unwrap().0
    }

    fn socket_v6(&self, _handle: i32) -> i32 {
        self.sockets.lock().unwrap().1
    }

    fn version(&self) -> String {
        "fake-wg 0.0.1".to_string()
    }
}

#[derive(Debug, Clone)]
enum ClientMode {
    RunUntilStopped,
    Fail(String),
    Panic,
}

pub struct FakeOpenVpnClient {
    mode: ClientMode,
    connects: AtomicUsize,
    log: EventLog,
}

impl FakeOpenVpnClient {
    pub fn new() -> Self {
        Self::build(ClientMode::RunUntilStopped, EventLog::default())
    }

    pub fn failing(msg: &str) -> Self {
        Self::build(ClientMode::Fail(msg.to_string()), EventLog::default())
    }

    pub fn panicking() -> Self {
        Self::build(ClientMode::Panic, EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self::build(ClientMode::RunUntilStopped, log)
    }

    fn build(mode: ClientMode, log: EventLog) -> Self {
        Self {
            mode,
            connects: AtomicUsize::new(0),
            log,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl OpenVpnClient for FakeOpenVpnClient {
    fn version(&self) -> String {
        "fake-ovpn 0.0.1".to_string()
    }

    fn connect(
        &self,
        _profile: &str,
        tun: &TunDescriptor,
        stop: &StopSignal,
    ) -> Result<(), String> {
        assert!(tun.raw_fd() >= 0);
        self.log.push("ovpn:connect");
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            ClientMode::RunUntilStopped => {
                stop.wait();
                self.log.push("ovpn:disconnect");
                Ok(())
            }
            ClientMode::Fail(msg) => Err(msg.clone()),
            ClientMode::Panic => panic!("client crashed"),
        }
    }
}
