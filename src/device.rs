//! Source device discovery, exclusive grab, and the uinput virtual device

use crate::event::{FrameDecoder, OutputEvent, RawEvent, encode};
use anyhow::{Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, AttributeSetRef, Device, Key, MiscType, PropType, RelativeAxisType};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, trace, warn};

/// Appended to the source name to name the virtual device. Devices
/// carrying it are never picked as a source.
pub const VIRTUAL_SUFFIX: &str = " (midbutton)";

/// Events older than this are treated as having just arrived.
const MAX_EVENT_AGE: Duration = Duration::from_secs(1);

/// Reads timestamped input, blocking at most `timeout`.
pub trait EventSource {
    /// Returns an empty batch when the timeout elapsed without input.
    fn next_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawEvent, Instant)>>;
}

/// Writes output events to the virtual device in order.
pub trait EventSink {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<()>;
}

/// Capabilities relevant for picking the trackpoint node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub left_right: bool,
    pub middle: bool,
    pub relative: bool,
    pub absolute: bool,
}

impl Capabilities {
    fn of(dev: &Device) -> Self {
        let keys = dev.supported_keys();
        let has = |key: Key| keys.map(|k| k.contains(key)).unwrap_or(false);
        Self {
            left_right: has(Key::BTN_LEFT) && has(Key::BTN_RIGHT),
            middle: has(Key::BTN_MIDDLE),
            relative: dev
                .supported_relative_axes()
                .map(|r| r.contains(RelativeAxisType::REL_X) && r.contains(RelativeAxisType::REL_Y))
                .unwrap_or(false),
            absolute: dev
                .supported_absolute_axes()
                .map(|a| a.iter().next().is_some())
                .unwrap_or(false),
        }
    }
}

/// Information about one /dev/input/event* node
#[derive(Debug, Clone)]
pub struct InputInterface {
    pub path: PathBuf,
    pub name: String,
    pub caps: Capabilities,
    pub is_candidate: bool,
}

fn matches_name(name: &str, patterns: &[String]) -> bool {
    let name_lower = name.to_ascii_lowercase();
    patterns
        .iter()
        .any(|p| !p.is_empty() && name_lower.contains(&p.to_ascii_lowercase()))
}

/// Whether a device looks like a two-button trackpoint we should grab.
pub fn is_candidate(name: &str, caps: Capabilities, patterns: &[String]) -> bool {
    if name.ends_with(VIRTUAL_SUFFIX) {
        return false;
    }
    // Anything reporting absolute positions is most likely a touchpad.
    matches_name(name, patterns) && caps.left_right && caps.relative && !caps.absolute
}

/// List all input interfaces for debugging purposes.
pub fn list_input_interfaces(patterns: &[String]) -> Vec<InputInterface> {
    let mut interfaces: Vec<InputInterface> = evdev::enumerate()
        .map(|(path, dev)| {
            let name = dev.name().unwrap_or_default().to_string();
            let caps = Capabilities::of(&dev);
            let is_candidate = is_candidate(&name, caps, patterns);
            InputInterface {
                path,
                name,
                caps,
                is_candidate,
            }
        })
        .collect();
    interfaces.sort_by(|a, b| a.path.cmp(&b.path));
    interfaces
}

/// Pick the best candidate. Some laptops (HP EliteBook 850 G7) expose
/// several nodes with the trackpoint's name; the real one advertises a
/// middle button it does not physically have.
pub fn pick_candidate(interfaces: &[InputInterface]) -> Option<&InputInterface> {
    let mut candidates = interfaces.iter().filter(|i| i.is_candidate);
    let first = candidates.next()?;
    if first.caps.middle {
        return Some(first);
    }
    Some(candidates.find(|i| i.caps.middle).unwrap_or(first))
}

pub fn select_source_device(
    preferred_device: Option<&Path>,
    patterns: &[String],
) -> Option<PathBuf> {
    if let Some(path) = preferred_device {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("Configured device {:?} does not exist, falling back to discovery", path);
    }

    info!("Scanning /dev/input/event* devices for a trackpoint...");
    let interfaces = list_input_interfaces(patterns);
    for iface in &interfaces {
        debug!(
            "  {:?}: '{}' left_right={} middle={} rel={} abs={} candidate={}",
            iface.path,
            iface.name,
            iface.caps.left_right,
            iface.caps.middle,
            iface.caps.relative,
            iface.caps.absolute,
            iface.is_candidate
        );
    }

    match pick_candidate(&interfaces) {
        Some(iface) => {
            info!("Selected trackpoint: {:?} ('{}')", iface.path, iface.name);
            Some(iface.path.clone())
        }
        None => {
            warn!("No suitable input device found!");
            None
        }
    }
}

/// Map a kernel (wall clock) event timestamp onto the monotonic clock.
pub fn arrival_instant(stamp: SystemTime, now: Instant, wall_now: SystemTime) -> Instant {
    let age = wall_now
        .duration_since(stamp)
        .unwrap_or(Duration::ZERO)
        .min(MAX_EVENT_AGE);
    now.checked_sub(age).unwrap_or(now)
}

fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        // Round up so we never wake just before a deadline.
        Some(d) => d.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32,
        None => -1,
    }
}

/// The physical device, exclusively grabbed for as long as this lives.
pub struct GrabbedDevice {
    path: PathBuf,
    name: String,
    device: Device,
    decoder: FrameDecoder,
}

impl GrabbedDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let mut device = Device::open(path).with_context(|| {
            format!("Failed to open evdev device: {path:?} (are you root or in the 'input' group?)")
        })?;

        set_nonblocking(&device).context("Failed to set evdev device non-blocking")?;

        // Grab the device so the original events don't reach the system.
        device
            .grab()
            .with_context(|| format!("Failed to grab evdev device: {path:?}"))?;

        let name = device.name().unwrap_or_default().to_string();
        info!("Grabbed device: {:?} ('{}')", path, name);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            device,
            decoder: FrameDecoder::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut fds = [libc::pollfd {
            fd: self.device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, poll_timeout_ms(timeout)) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err).context("poll() on evdev device failed");
        }
        if rc > 0 && fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            anyhow::bail!("Input device {:?} was removed", self.path);
        }
        Ok(rc > 0)
    }
}

impl EventSource for GrabbedDevice {
    fn next_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawEvent, Instant)>> {
        let mut batch = Vec::new();
        if !self.wait_readable(timeout)? {
            return Ok(batch);
        }

        let now = Instant::now();
        let wall_now = SystemTime::now();
        match self.device.fetch_events() {
            Ok(events) => {
                for ev in events {
                    if let Some(frame) = self.decoder.push(&ev) {
                        let at = arrival_instant(ev.timestamp(), now, wall_now);
                        batch.extend(frame.into_iter().map(|raw| (raw, at)));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Spurious wakeup, nothing to read
            }
            Err(e) => return Err(e).context("Failed to read events from evdev device"),
        }
        Ok(batch)
    }
}

impl Drop for GrabbedDevice {
    fn drop(&mut self) {
        // Best-effort ungrab. (Closing the fd also releases the grab.)
        match self.device.ungrab() {
            Ok(()) => info!("Released device: {:?}", self.path),
            Err(e) => debug!("Ungrab of {:?} failed: {}", self.path, e),
        }
    }
}

/// What the virtual device advertises: everything the source does,
/// plus the buttons and axes the emulator may emit.
#[derive(Debug)]
pub struct VirtualCapabilities {
    pub keys: AttributeSet<Key>,
    pub rel: AttributeSet<RelativeAxisType>,
    pub props: AttributeSet<PropType>,
    pub msc: AttributeSet<MiscType>,
}

impl VirtualCapabilities {
    pub fn mirror(
        keys: Option<&AttributeSetRef<Key>>,
        rel: Option<&AttributeSetRef<RelativeAxisType>>,
        props: &AttributeSetRef<PropType>,
        msc: Option<&AttributeSetRef<MiscType>>,
    ) -> Self {
        let mut caps = Self {
            keys: AttributeSet::new(),
            rel: AttributeSet::new(),
            props: AttributeSet::new(),
            msc: AttributeSet::new(),
        };
        for k in keys.into_iter().flat_map(|k| k.iter()) {
            caps.keys.insert(k);
        }
        for axis in rel.into_iter().flat_map(|r| r.iter()) {
            caps.rel.insert(axis);
        }
        for prop in props.iter() {
            caps.props.insert(prop);
        }
        for misc in msc.into_iter().flat_map(|m| m.iter()) {
            caps.msc.insert(misc);
        }

        caps.keys.insert(Key::BTN_LEFT);
        caps.keys.insert(Key::BTN_RIGHT);
        caps.keys.insert(Key::BTN_MIDDLE);
        caps.rel.insert(RelativeAxisType::REL_X);
        caps.rel.insert(RelativeAxisType::REL_Y);
        caps
    }
}

/// Virtual output device mirroring the source's capabilities plus a
/// middle button.
pub struct VirtualSink {
    device: VirtualDevice,
}

impl VirtualSink {
    pub fn create(source: &GrabbedDevice) -> Result<Self> {
        let dev = &source.device;
        let caps = VirtualCapabilities::mirror(
            dev.supported_keys(),
            dev.supported_relative_axes(),
            dev.properties(),
            dev.misc_properties(),
        );

        let name = format!("{}{}", source.name(), VIRTUAL_SUFFIX);
        let mut builder = VirtualDeviceBuilder::new()
            .context("Failed to create uinput builder (is the uinput module loaded?)")?
            .name(&name)
            .with_keys(&caps.keys)
            .context("Failed to set key capabilities")?
            .with_relative_axes(&caps.rel)
            .context("Failed to set relative axis capabilities")?
            // POINTING_STICK makes libinput treat us as a trackpoint
            // (acceleration profile, on-button scrolling).
            .with_properties(&caps.props)
            .context("Failed to set input properties")?;
        if caps.msc.iter().next().is_some() {
            builder = builder
                .with_msc(&caps.msc)
                .context("Failed to set misc capabilities")?;
        }
        let device = builder.build().context("Failed to build uinput device")?;

        info!("Virtual device created: '{}' [props={:?}]", name, caps.props);
        Ok(Self { device })
    }
}

impl EventSink for VirtualSink {
    fn emit(&mut self, events: &[OutputEvent]) -> Result<()> {
        let encoded = encode(events);
        if encoded.is_empty() {
            return Ok(());
        }
        trace!("Emit: {:?}", events);
        self.device.emit(&encoded).context("uinput emit failed")
    }
}

fn set_nonblocking(dev: &Device) -> Result<()> {
    let raw_fd = dev.as_raw_fd();

    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(std::io::Error::last_os_error()).context("fcntl(F_GETFL) failed");
    }

    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error()).context("fcntl(F_SETFL, O_NONBLOCK) failed");
    }
    Ok(())
}
