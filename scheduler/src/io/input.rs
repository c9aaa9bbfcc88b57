//! Key sources for tasks blocked in `read_input`.

use std::{cell::RefCell, collections::VecDeque, io, mem, os::fd::RawFd, rc::Rc};

/// Maximum number of keys a [`ScriptedInput`] will queue
const INPUT_BUFFER_SIZE: usize = 256;

/// Non-blocking key source.
pub trait InputSource {
    /// Returns the next key if one is waiting, without blocking.
    fn poll_key(&mut self) -> Option<char>;
}

/// Input source that never has a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll_key(&mut self) -> Option<char> {
        None
    }
}

/// Queue of keys fed by the program itself.
///
/// Clones share the queue, so a test or a task can push keys that the
/// scheduler later delivers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    keys: Rc<RefCell<VecDeque<char>>>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        ScriptedInput::default()
    }

    /// Queues a key, dropping it if the buffer is full.
    pub fn push(&self, key: char) {
        let mut keys = self.keys.borrow_mut();
        if keys.len() < INPUT_BUFFER_SIZE {
            keys.push_back(key);
        } else {
            warn!("scripted input buffer overflow, dropping {:?}", key);
        }
    }

    pub fn push_str(&self, keys: &str) {
        keys.chars().for_each(|key| self.push(key));
    }

    pub fn pending(&self) -> usize {
        self.keys.borrow().len()
    }
}

impl InputSource for ScriptedInput {
    fn poll_key(&mut self) -> Option<char> {
        self.keys.borrow_mut().pop_front()
    }
}

/// Terminal on standard input, switched to non-canonical, non-echoing mode.
///
/// The original terminal attributes are restored on drop. When standard
/// input is not a terminal the mode is left alone and bytes are read as
/// they arrive.
pub struct TerminalInput {
    fd: RawFd,
    saved: Option<libc::termios>,
}

impl TerminalInput {
    pub fn stdin() -> io::Result<Self> {
        Self::from_fd(libc::STDIN_FILENO)
    }

    pub fn from_fd(fd: RawFd) -> io::Result<Self> {
        if unsafe { libc::isatty(fd) } != 1 {
            debug!("fd {} is not a terminal, reading it as-is", fd);
            return Ok(TerminalInput { fd, saved: None });
        }

        let mut saved: libc::termios = unsafe { mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 0;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }

        debug!("terminal on fd {} switched to raw input", fd);
        Ok(TerminalInput {
            fd,
            saved: Some(saved),
        })
    }

    /// Returns one byte if `poll(2)` reports the fd readable.
    fn read_byte(&self) -> Option<u8> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if ready <= 0 || pollfd.revents & libc::POLLIN == 0 {
            return None;
        }

        let mut byte = 0u8;
        let read = unsafe { libc::read(self.fd, (&raw mut byte).cast(), 1) };
        (read == 1).then_some(byte)
    }
}

impl InputSource for TerminalInput {
    fn poll_key(&mut self) -> Option<char> {
        let lead = self.read_byte()?;
        let width = utf8_width(lead);
        if width == 1 {
            return Some(lead as char);
        }

        let mut bytes = [lead, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            match self.read_byte() {
                Some(byte) => *slot = byte,
                None => return Some(char::REPLACEMENT_CHARACTER),
            }
        }
        decode(&bytes[..width])
    }
}

impl Drop for TerminalInput {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.as_ref() {
            if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, saved) } != 0 {
                error!("failed to restore terminal attributes: {}", io::Error::last_os_error());
            }
        }
    }
}

/// Length of the UTF-8 sequence introduced by `lead`.
///
/// Stray continuation and invalid bytes count as one byte so they decode
/// to a replacement character on their own.
fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 1,
    }
}

fn decode(bytes: &[u8]) -> Option<char> {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.chars().next(),
        Err(_) => Some(char::REPLACEMENT_CHARACTER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_input_is_fifo_and_shared() {
        let input = ScriptedInput::new();
        let mut source = input.clone();
        input.push_str("ab");
        assert_eq!(source.poll_key(), Some('a'));
        input.push('c');
        assert_eq!(source.poll_key(), Some('b'));
        assert_eq!(source.poll_key(), Some('c'));
        assert_eq!(source.poll_key(), None);
    }

    #[test]
    fn scripted_input_drops_keys_past_capacity() {
        let input = ScriptedInput::new();
        for _ in 0..INPUT_BUFFER_SIZE + 10 {
            input.push('x');
        }
        assert_eq!(input.pending(), INPUT_BUFFER_SIZE);
    }

    #[test]
    fn utf8_widths() {
        assert_eq!(utf8_width(b'q'), 1);
        assert_eq!("é".as_bytes().len(), utf8_width("é".as_bytes()[0]));
        assert_eq!("€".as_bytes().len(), utf8_width("€".as_bytes()[0]));
        assert_eq!("🦀".as_bytes().len(), utf8_width("🦀".as_bytes()[0]));
        assert_eq!(utf8_width(0x80), 1);
    }

    #[test]
    fn decode_rejects_broken_sequences() {
        assert_eq!(decode("€".as_bytes()), Some('€'));
        assert_eq!(decode(&[0xE2, 0x28, 0xA1]), Some(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn terminal_input_reads_a_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let [read_end, write_end] = fds;

        let mut input = TerminalInput::from_fd(read_end).unwrap();
        assert_eq!(input.poll_key(), None);

        let bytes = "hé".as_bytes();
        let written = unsafe { libc::write(write_end, bytes.as_ptr().cast(), bytes.len()) };
        assert_eq!(written, bytes.len() as isize);

        assert_eq!(input.poll_key(), Some('h'));
        assert_eq!(input.poll_key(), Some('é'));
        assert_eq!(input.poll_key(), None);

        unsafe {
            libc::close(read_end);
            libc::close(write_end);
        }
    }
}
