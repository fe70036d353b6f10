use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{self, FlushArg, SetArg};
use thiserror::Error;

use crate::color::Color;

const BEL: u8 = 0x07;
const ESC: u8 = 0x1b;

/// OSC 11 query: the terminal answers with its current background.
pub const QUERY_BACKGROUND: &[u8] = b"\x1b]11;?\x07";
/// OSC 111: reset the background to the terminal's configured default.
pub const RESET_BACKGROUND: &[u8] = b"\x1b]111\x07";

/// Primary device attributes. Every terminal answers it, in order, so its
/// reply arrives after any answer to an earlier query.
const QUERY_DEVICE_ATTRIBUTES: &[u8] = b"\x1b[c";

/// After a timed-out query, how long a late answer may still take to arrive.
const DRAIN_WINDOW: Duration = Duration::from_millis(300);

/// Replies longer than this are not OSC 11 answers.
const MAX_REPLY: usize = 256;

#[derive(Debug, Error)]
pub enum TerminalControlError {
    #[error("failed to write control sequence")]
    Write(#[from] io::Error),
}

/// Byte-level access to the terminal that owns the pane.
pub trait TerminalDevice {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Send `request` and collect the reply, or `None` if nothing complete
    /// arrives within `timeout`.
    fn query(&mut self, request: &[u8], timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// The controlling terminal, opened through /dev/tty so the child's streams are untouched.
pub struct Tty {
    file: File,
}

impl Tty {
    pub fn open() -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    /// Append input to `received` until `done` holds or `deadline` passes.
    fn read_until(
        &mut self,
        received: &mut Vec<u8>,
        deadline: Instant,
        done: impl Fn(&[u8]) -> bool,
    ) -> io::Result<bool> {
        let mut chunk = [0u8; 64];
        loop {
            if done(received) {
                return Ok(true);
            }
            if received.len() > MAX_REPLY {
                return Ok(false);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let ms = remaining.as_millis().clamp(1, u16::MAX as u128) as u16;
            let ready = {
                let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
                poll(&mut fds, PollTimeout::from(ms))
            };
            match ready {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                return Ok(false);
            }
            received.extend_from_slice(&chunk[..n]);
        }
    }

    fn exchange(&mut self, request: &[u8], timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.file.write_all(request)?;
        self.file.write_all(QUERY_DEVICE_ATTRIBUTES)?;
        self.file.flush()?;

        let mut received = Vec::new();
        let answered = self.read_until(&mut received, Instant::now() + timeout, |buf| {
            device_attributes_reply(buf).is_some()
        })?;

        if !answered {
            // A late answer must never reach ssh as typed input
            let drained = self.read_until(&mut received, Instant::now() + DRAIN_WINDOW, |buf| {
                device_attributes_reply(buf).is_some()
            })?;
            termios::tcflush(&self.file, FlushArg::TCIFLUSH)?;
            tracing::debug!(drained, discarded = received.len(), "terminal query timed out");
            return Ok(None);
        }

        // Only what precedes the device attributes belongs to `request`
        let end = device_attributes_reply(&received).unwrap_or(received.len());
        received.truncate(end);
        Ok(is_complete_reply(&received).then_some(received))
    }
}

impl TerminalDevice for Tty {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()
    }

    fn query(&mut self, request: &[u8], timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        // Raw mode keeps the reply from being echoed or line-buffered
        let saved = termios::tcgetattr(&self.file)?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &raw)?;
        let result = self.exchange(request, timeout);
        let _ = termios::tcsetattr(&self.file, SetArg::TCSANOW, &saved);
        result
    }
}

/// Stand-in for terminals that must not receive escape sequences.
pub struct NullTerminal;

impl TerminalDevice for NullTerminal {
    fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn query(&mut self, _request: &[u8], _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Pick the device for this invocation: the real tty when stdout is an
/// interactive terminal, otherwise a null device.
pub fn open_device() -> Box<dyn TerminalDevice> {
    if !io::stdout().is_terminal() {
        tracing::info!("stdout is not a terminal, colours disabled");
        return Box::new(NullTerminal);
    }
    if std::env::var("TERM").is_ok_and(|term| term == "dumb") {
        tracing::info!("TERM=dumb, colours disabled");
        return Box::new(NullTerminal);
    }
    match Tty::open() {
        Ok(tty) => Box::new(tty),
        Err(e) => {
            tracing::warn!(error = ?e, "cannot open /dev/tty, colours disabled");
            Box::new(NullTerminal)
        }
    }
}

/// OSC 11 set sequence for `color`.
pub fn set_background_sequence(color: Color) -> Vec<u8> {
    format!("\x1b]11;{}\x07", color.osc_payload()).into_bytes()
}

/// Start of a `ESC [ ? Ps ; ... c` device attributes reply, if one is present.
fn device_attributes_reply(buf: &[u8]) -> Option<usize> {
    (0..buf.len()).find(|&start| {
        let Some(rest) = buf[start..].strip_prefix(b"\x1b[?") else {
            return false;
        };
        let params = rest
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b';')
            .count();
        rest.get(params) == Some(&b'c')
    })
}

fn is_complete_reply(reply: &[u8]) -> bool {
    reply.contains(&BEL) || reply.windows(2).any(|w| w == [ESC, b'\\'])
}

/// Parse `ESC ] 11 ; rgb:RRRR/GGGG/BBBB` terminated by BEL or ST.
pub fn parse_background_reply(reply: &[u8]) -> Option<Color> {
    let text = String::from_utf8_lossy(reply);
    let start = text.find("\x1b]11;")? + "\x1b]11;".len();
    let body = &text[start..];
    let end = body.find(['\x07', '\x1b']).unwrap_or(body.len());
    Color::parse(&body[..end]).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaneState {
    /// No colour has been written yet.
    Untouched,
    /// A colour was written; `original` is what the pane had before, if known.
    Tinted { original: Option<Color> },
    Restored,
}

/// Owns every colour change made to the pane during one session.
pub struct TerminalController {
    device: Box<dyn TerminalDevice>,
    query_timeout: Duration,
    state: PaneState,
}

impl TerminalController {
    pub fn new(device: Box<dyn TerminalDevice>, query_timeout: Duration) -> Self {
        Self {
            device,
            query_timeout,
            state: PaneState::Untouched,
        }
    }

    /// Remember the current background, then paint the pane with `color`.
    ///
    /// Only the first call has any effect. A failed or unanswered query is
    /// not an error: restore then falls back to resetting the pane.
    pub fn capture_and_set(&mut self, color: Color) -> Result<(), TerminalControlError> {
        if self.state != PaneState::Untouched {
            return Ok(());
        }
        let original = match self.device.query(QUERY_BACKGROUND, self.query_timeout) {
            Ok(Some(reply)) => {
                let parsed = parse_background_reply(&reply);
                if parsed.is_none() {
                    tracing::warn!(reply = ?String::from_utf8_lossy(&reply), "unparsable background reply");
                }
                parsed
            }
            Ok(None) => {
                tracing::info!("terminal did not report its background");
                None
            }
            Err(e) => {
                tracing::warn!(error = ?e, "background query failed");
                None
            }
        };
        tracing::debug!(original = ?original.map(|c| c.to_string()), target = %color, "tinting pane");

        self.device.write_all(&set_background_sequence(color))?;
        self.state = PaneState::Tinted { original };
        Ok(())
    }

    /// Undo `capture_and_set`. No-op unless a colour was written, and only once.
    pub fn restore(&mut self) -> Result<(), TerminalControlError> {
        let PaneState::Tinted { original } = self.state else {
            return Ok(());
        };
        self.state = PaneState::Restored;
        match original {
            Some(color) => {
                tracing::debug!(color = %color, "restoring captured background");
                self.device.write_all(&set_background_sequence(color))?;
            }
            None => {
                tracing::debug!("resetting background to terminal default");
                self.device.write_all(RESET_BACKGROUND)?;
            }
        }
        Ok(())
    }

    /// Whether the pane currently carries our colour.
    pub fn is_tinted(&self) -> bool {
        matches!(self.state, PaneState::Tinted { .. })
    }

    /// Reset the pane background unconditionally.
    pub fn reset_pane(&mut self) -> Result<(), TerminalControlError> {
        self.device.write_all(RESET_BACKGROUND)?;
        self.state = PaneState::Restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Records every write; answers queries with a canned reply.
    struct Recorder {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        reply: Option<Vec<u8>>,
        fail_writes: bool,
    }

    impl TerminalDevice for Recorder {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn query(&mut self, _request: &[u8], _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
            Ok(self.reply.clone())
        }
    }

    fn controller(reply: Option<&[u8]>) -> (TerminalController, Arc<Mutex<Vec<Vec<u8>>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let device = Recorder {
            writes: Arc::clone(&writes),
            reply: reply.map(|r| r.to_vec()),
            fail_writes: false,
        };
        (
            TerminalController::new(Box::new(device), Duration::from_millis(10)),
            writes,
        )
    }

    const RED: Color = Color::rgb(0xff, 0, 0);

    #[test]
    fn test_parse_reply_bel() {
        let reply = b"\x1b]11;rgb:1e1e/1e1e/2e2e\x07";
        assert_eq!(
            parse_background_reply(reply),
            Some(Color::rgb(0x1e, 0x1e, 0x2e))
        );
    }

    #[test]
    fn test_parse_reply_st() {
        let reply = b"\x1b]11;rgb:ff/80/00\x1b\\";
        assert_eq!(parse_background_reply(reply), Some(Color::rgb(0xff, 0x80, 0x00)));
    }

    #[test]
    fn test_parse_reply_with_leading_noise() {
        let reply = b"ab\x1b]11;rgb:0000/0000/0000\x07";
        assert_eq!(parse_background_reply(reply), Some(Color::rgb(0, 0, 0)));
    }

    #[test]
    fn test_parse_reply_garbage() {
        assert_eq!(parse_background_reply(b"\x1b[?1;2c"), None);
        assert_eq!(parse_background_reply(b"\x1b]11;bogus\x07"), None);
    }

    #[test]
    fn test_complete_reply_detection() {
        assert!(is_complete_reply(b"\x1b]11;rgb:0/0/0\x07"));
        assert!(is_complete_reply(b"\x1b]11;rgb:0/0/0\x1b\\"));
        assert!(!is_complete_reply(b"\x1b]11;rgb:0/0"));
    }

    #[test]
    fn test_set_then_restore_exact() {
        let (mut ctl, writes) = controller(Some(b"\x1b]11;rgb:1010/2020/3030\x07"));
        ctl.capture_and_set(RED).unwrap();
        assert!(ctl.is_tinted());
        ctl.restore().unwrap();
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"\x1b]11;#ff0000\x07");
        assert_eq!(writes[1], b"\x1b]11;#102030\x07");
    }

    #[test]
    fn test_query_timeout_degrades_to_reset() {
        let (mut ctl, writes) = controller(None);
        ctl.capture_and_set(RED).unwrap();
        ctl.restore().unwrap();
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0], b"\x1b]11;#ff0000\x07");
        assert_eq!(writes[1], RESET_BACKGROUND);
    }

    #[test]
    fn test_restore_without_set_is_noop() {
        let (mut ctl, writes) = controller(None);
        ctl.restore().unwrap();
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restore_runs_once() {
        let (mut ctl, writes) = controller(None);
        ctl.capture_and_set(RED).unwrap();
        ctl.restore().unwrap();
        ctl.restore().unwrap();
        assert_eq!(writes.lock().unwrap().len(), 2);
        assert!(!ctl.is_tinted());
    }

    #[test]
    fn test_capture_happens_at_most_once() {
        let (mut ctl, writes) = controller(None);
        ctl.capture_and_set(RED).unwrap();
        ctl.capture_and_set(Color::rgb(0, 0, 0xff)).unwrap();
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_nothing_to_restore() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let device = Recorder {
            writes: Arc::clone(&writes),
            reply: None,
            fail_writes: true,
        };
        let mut ctl = TerminalController::new(Box::new(device), Duration::from_millis(10));
        assert!(ctl.capture_and_set(RED).is_err());
        assert!(!ctl.is_tinted());
        ctl.restore().unwrap();
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_pane() {
        let (mut ctl, writes) = controller(None);
        ctl.reset_pane().unwrap();
        assert_eq!(writes.lock().unwrap()[0], RESET_BACKGROUND);
    }

    const DEVICE_ATTRIBUTES: &[u8] = b"\x1b[?62;22c";

    #[test]
    fn test_device_attributes_reply_position() {
        assert_eq!(device_attributes_reply(b"\x1b[?62;22c"), Some(0));
        assert_eq!(device_attributes_reply(b"\x1b]11;rgb:0/0/0\x07\x1b[?1;2c"), Some(15));
        assert_eq!(device_attributes_reply(b"\x1b[?62;22"), None);
        assert_eq!(device_attributes_reply(b"\x1b]11;rgb:0/0/0\x07"), None);
    }

    fn make_raw(file: &File) {
        let mut attrs = termios::tcgetattr(file).unwrap();
        termios::cfmakeraw(&mut attrs);
        termios::tcsetattr(file, SetArg::TCSANOW, &attrs).unwrap();
    }

    /// A pty whose terminal side answers the first request after `delay`.
    fn pty_answering(delay: Duration, answer: &'static [u8]) -> (File, thread::JoinHandle<File>) {
        let pty = openpty(None, None).unwrap();
        let slave = File::from(pty.slave);
        make_raw(&slave);
        let mut master = File::from(pty.master);
        let terminal = thread::spawn(move || {
            let mut request = [0u8; 64];
            let _ = master.read(&mut request);
            thread::sleep(delay);
            master.write_all(answer).unwrap();
            master
        });
        (slave, terminal)
    }

    fn pending_input(file: &File) -> bool {
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        poll(&mut fds, PollTimeout::from(0u16)).unwrap() > 0
    }

    #[test]
    fn test_tty_query_reads_prompt_reply() {
        let answer = b"\x1b]11;rgb:1e1e/1e1e/2e2e\x07\x1b[?62;22c";
        let (slave, terminal) = pty_answering(Duration::ZERO, answer);
        let mut tty = Tty::from_file(slave.try_clone().unwrap());

        let reply = tty.query(QUERY_BACKGROUND, Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(reply, b"\x1b]11;rgb:1e1e/1e1e/2e2e\x07");
        assert_eq!(parse_background_reply(&reply), Some(Color::rgb(0x1e, 0x1e, 0x2e)));
        assert!(!pending_input(&slave));
        terminal.join().unwrap();
    }

    #[test]
    fn test_tty_late_reply_is_not_left_as_input() {
        let answer = b"\x1b]11;rgb:1e1e/1e1e/2e2e\x07\x1b[?62;22c";
        let (slave, terminal) = pty_answering(Duration::from_millis(100), answer);
        let mut tty = Tty::from_file(slave.try_clone().unwrap());

        let reply = tty.query(QUERY_BACKGROUND, Duration::from_millis(20)).unwrap();
        assert!(reply.is_none());
        let _master = terminal.join().unwrap();
        assert!(!pending_input(&slave));
    }

    #[test]
    fn test_tty_without_osc11_answers_fast() {
        let (slave, terminal) = pty_answering(Duration::ZERO, DEVICE_ATTRIBUTES);
        let mut tty = Tty::from_file(slave.try_clone().unwrap());

        let start = Instant::now();
        let reply = tty.query(QUERY_BACKGROUND, Duration::from_secs(5)).unwrap();
        assert!(reply.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        terminal.join().unwrap();
    }

    #[test]
    fn test_null_terminal() {
        let mut null = NullTerminal;
        assert!(null.write_all(b"x").is_ok());
        assert!(null.query(QUERY_BACKGROUND, Duration::ZERO).unwrap().is_none());
    }
}
