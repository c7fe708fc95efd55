//! Scripted fakes of the capability, port, loader and asset server.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::firmware::AssetClient;
use crate::loader::{ChipInfo, FlashEntry, FlashOptions, Loader, LoaderFactory, ProgressFn, Transport};
use crate::port::{Capability, Port, PortEvent, PortId, PortProvider};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One observable action on a fake port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Open(u32),
    Close,
    Dtr(bool),
    Rts(bool),
    Wait(u64),
}

/// Shared record of port actions.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Line>>>);

impl Journal {
    pub fn push(&self, line: Line) {
        lock(&self.0).push(line);
    }

    pub fn lines(&self) -> Vec<Line> {
        lock(&self.0).clone()
    }

    pub fn count(&self, line: &Line) -> usize {
        lock(&self.0).iter().filter(|l| *l == line).count()
    }
}

pub struct FakePort {
    id: PortId,
    open: bool,
    journal: Journal,
    fail_open: Option<&'static str>,
    fail_close: bool,
    fail_signals: bool,
}

impl FakePort {
    pub fn new(name: &str) -> Self {
        Self::with_journal(name, Journal::default())
    }

    pub fn with_journal(name: &str, journal: Journal) -> Self {
        Self {
            id: PortId::new(name),
            open: false,
            journal,
            fail_open: None,
            fail_close: false,
            fail_signals: false,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn failing_open(mut self, message: &'static str) -> Self {
        self.fail_open = Some(message);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn failing_signals(mut self) -> Self {
        self.fail_signals = true;
        self
    }
}

impl Port for FakePort {
    fn id(&self) -> &PortId {
        &self.id
    }

    fn open(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(message) = self.fail_open {
            return Err(Error::Io(std::io::Error::other(message)));
        }
        self.open = true;
        self.journal.push(Line::Open(baud_rate));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        if self.fail_signals {
            return Err(Error::Unsupported("setSignals".into()));
        }
        self.journal.push(Line::Dtr(level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        if self.fail_signals {
            return Err(Error::Unsupported("setSignals".into()));
        }
        self.journal.push(Line::Rts(level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.journal.push(Line::Close);
        self.open = false;
        if self.fail_close {
            return Err(Error::Io(std::io::Error::other("close failed")));
        }
        Ok(())
    }
}

impl Read for FakePort {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// What the next `request_port` call does.
pub enum Grant {
    Port(FakePort),
    Cancel,
    Deny,
}

#[derive(Default)]
struct ProviderState {
    grants: VecDeque<Grant>,
    events: Vec<PortEvent>,
    requests: usize,
    capability: Option<Capability>,
}

/// Handle kept by a test to steer a [`FakeProvider`] after it moved into a controller.
#[derive(Clone, Default)]
pub struct ProviderHandle(Arc<Mutex<ProviderState>>);

impl ProviderHandle {
    pub fn queue(&self, grant: Grant) {
        lock(&self.0).grants.push_back(grant);
    }

    pub fn emit(&self, event: PortEvent) {
        lock(&self.0).events.push(event);
    }

    pub fn requests(&self) -> usize {
        lock(&self.0).requests
    }

    /// Override the provider's capability from now on.
    pub fn set_capability(&self, capability: Capability) {
        lock(&self.0).capability = Some(capability);
    }
}

pub struct FakeProvider {
    pub secure: bool,
    pub capability: Capability,
    journal: Journal,
    state: ProviderHandle,
}

impl FakeProvider {
    pub fn new(journal: Journal) -> Self {
        Self {
            secure: true,
            capability: Capability::Usable,
            journal,
            state: ProviderHandle::default(),
        }
    }

    pub fn handle(&self) -> ProviderHandle {
        self.state.clone()
    }
}

impl PortProvider for FakeProvider {
    fn is_secure_context(&self) -> bool {
        self.secure
    }

    fn capability(&self) -> Capability {
        lock(&self.state.0).capability.unwrap_or(self.capability)
    }

    fn request_port(&mut self) -> Result<Box<dyn Port>> {
        let mut state = lock(&self.state.0);
        state.requests += 1;
        match state.grants.pop_front() {
            Some(Grant::Port(port)) => Ok(Box::new(port)),
            Some(Grant::Cancel) => Err(Error::UserCancelled),
            Some(Grant::Deny) => Err(Error::PermissionDenied("access denied".into())),
            None => Ok(Box::new(FakePort::with_journal(
                "ttyFAKE",
                self.journal.clone(),
            ))),
        }
    }

    fn poll_events(&mut self) -> Vec<PortEvent> {
        std::mem::take(&mut lock(&self.state.0).events)
    }
}

/// Behaviour and call counts shared by every loader a [`FakeFactory`] creates.
#[derive(Debug, Default)]
pub struct LoaderScript {
    pub probe_error: Option<String>,
    pub chip_name: String,
    pub write_error: Option<String>,
    pub erase_error: Option<String>,
    pub hard_reset_error: bool,
    pub disconnect_error: bool,
    pub progress_steps: Vec<(usize, usize)>,
    pub probes: usize,
    pub writes: usize,
    pub erases: usize,
    pub hard_resets: usize,
    pub disconnects: usize,
    pub last_address: Option<u32>,
    pub last_len: Option<usize>,
    pub last_file_name: Option<String>,
    pub last_options: Option<FlashOptions>,
}

#[derive(Clone, Default)]
pub struct FakeFactory(pub Arc<Mutex<LoaderScript>>);

impl FakeFactory {
    pub fn script(&self) -> MutexGuard<'_, LoaderScript> {
        lock(&self.0)
    }
}

impl LoaderFactory for FakeFactory {
    fn create(&self, _baud_rate: u32) -> Box<dyn Loader> {
        Box::new(FakeLoader(Arc::clone(&self.0)))
    }
}

struct FakeLoader(Arc<Mutex<LoaderScript>>);

impl Loader for FakeLoader {
    fn probe(&mut self, _transport: &mut dyn Transport) -> Result<ChipInfo> {
        let mut script = lock(&self.0);
        script.probes += 1;
        match &script.probe_error {
            Some(msg) => Err(Error::Timeout(msg.clone())),
            None => Ok(ChipInfo::named(script.chip_name.clone())),
        }
    }

    fn write_flash(
        &mut self,
        _transport: &mut dyn Transport,
        entries: &[FlashEntry<'_>],
        options: &FlashOptions,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        let steps = {
            let mut script = lock(&self.0);
            script.writes += 1;
            script.last_address = entries.first().map(|e| e.address);
            script.last_len = entries.first().map(|e| e.data.len());
            script.last_file_name = entries.first().map(|e| e.file_name.to_string());
            script.last_options = Some(options.clone());
            script.progress_steps.clone()
        };
        for (written, total) in steps {
            progress(0, written, total);
        }
        match &lock(&self.0).write_error {
            Some(msg) => Err(Error::Protocol(msg.clone())),
            None => Ok(()),
        }
    }

    fn erase_flash(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        let mut script = lock(&self.0);
        script.erases += 1;
        match &script.erase_error {
            Some(msg) => Err(Error::Protocol(msg.clone())),
            None => Ok(()),
        }
    }

    fn hard_reset(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        let mut script = lock(&self.0);
        script.hard_resets += 1;
        if script.hard_reset_error {
            Err(Error::Unsupported("hard reset".into()))
        } else {
            Ok(())
        }
    }

    fn disconnect(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        let mut script = lock(&self.0);
        script.disconnects += 1;
        if script.disconnect_error {
            Err(Error::Protocol("loader already gone".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeAssets {
    files: HashMap<String, Vec<u8>>,
}

impl FakeAssets {
    pub fn with(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), data);
        self
    }
}

impl AssetClient for FakeAssets {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or(Error::HttpStatus(404))
    }
}
