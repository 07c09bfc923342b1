//! The handle adapter (component F): wraps a non-blocking descriptor in
//! a blocking-looking interface, suspending the calling context instead
//! of the OS thread while waiting for readiness or a timeout.
//!
//! Built on [`IoReactor`], a small `poll(2)`-based reference reactor —
//! sufficient to drive real sockets and pipes in tests, not a
//! replacement for a production epoll/kqueue binding.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::reactor::Reactor;
use crate::scheduler;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn poll_events(self) -> libc::c_short {
        match self {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        }
    }
}

struct PendingWait {
    ctx: Context,
    outcome: Rc<Cell<Option<bool>>>,
    fd: Option<(RawFd, Direction)>,
    deadline: Option<Instant>,
}

/// A `poll(2)`-based reactor driving both the handle adapter's fd
/// watches and [`crate::timer::sleep`]-style deadlines in one place.
#[derive(Default)]
pub struct IoReactor {
    waits: HashMap<u64, PendingWait>,
    next_token: u64,
}

impl IoReactor {
    pub fn new() -> Self {
        IoReactor {
            waits: HashMap::new(),
            next_token: 0,
        }
    }

    fn register(
        &mut self,
        ctx: Context,
        outcome: Rc<Cell<Option<bool>>>,
        fd: Option<(RawFd, Direction)>,
        deadline: Option<Instant>,
    ) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.waits.insert(
            token,
            PendingWait {
                ctx,
                outcome,
                fd,
                deadline,
            },
        );
        token
    }

    pub fn cancel(&mut self, token: u64) {
        self.waits.remove(&token);
    }
}

impl Reactor for IoReactor {
    fn poll_once(&mut self, deadline: Option<Instant>) -> usize {
        let mut pollfds: Vec<libc::pollfd> = Vec::new();
        let mut pollfd_tokens: Vec<u64> = Vec::new();
        let mut nearest: Option<Instant> = deadline;

        for (&token, wait) in self.waits.iter() {
            if let Some((fd, dir)) = wait.fd {
                pollfds.push(libc::pollfd {
                    fd,
                    events: dir.poll_events(),
                    revents: 0,
                });
                pollfd_tokens.push(token);
            }
            if let Some(d) = wait.deadline {
                nearest = Some(nearest.map_or(d, |n| n.min(d)));
            }
        }

        let timeout_ms: libc::c_int = match nearest {
            Some(d) => {
                let now = Instant::now();
                if d <= now {
                    0
                } else {
                    (d - now).as_millis().min(i64::from(i32::MAX) as u128) as libc::c_int
                }
            }
            None => -1,
        };

        if !pollfds.is_empty() || timeout_ms >= 0 {
            unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms);
            }
        } else {
            // Nothing registered at all and no deadline: there is
            // nothing to wait on.
            return 0;
        }

        let mut fired_tokens: Vec<u64> = Vec::new();
        for (pfd, &token) in pollfds.iter().zip(pollfd_tokens.iter()) {
            if pfd.revents != 0 {
                fired_tokens.push(token);
            }
        }

        let now = Instant::now();
        let mut timed_out_tokens: Vec<u64> = Vec::new();
        for (&token, wait) in self.waits.iter() {
            if fired_tokens.contains(&token) {
                continue;
            }
            if let Some(d) = wait.deadline {
                if d <= now {
                    timed_out_tokens.push(token);
                }
            }
        }

        let mut woken = 0;
        for token in fired_tokens {
            if let Some(wait) = self.waits.remove(&token) {
                wait.outcome.set(Some(true));
                let _ = wait.ctx.ready();
                woken += 1;
            }
        }
        for token in timed_out_tokens {
            if let Some(wait) = self.waits.remove(&token) {
                wait.outcome.set(Some(false));
                let _ = wait.ctx.ready();
                woken += 1;
            }
        }
        woken
    }
}

thread_local! {
    static IO_REACTOR: RefCell<IoReactor> = RefCell::new(IoReactor::new());
    static INSTALLED: Cell<bool> = Cell::new(false);
}

fn ensure_installed() {
    INSTALLED.with(|installed| {
        if installed.get() {
            return;
        }
        installed.set(true);
        scheduler::set_idle_hook(|| {
            if scheduler::stats().ready_total() > 0 {
                return true;
            }
            IO_REACTOR.with(|r| r.borrow_mut().poll_once(None)) > 0
        });
    });
}

/// Suspend the current context until `fd` is ready for `dir`, or
/// `timeout` elapses. Returns `true` if the fd signalled, `false` if the
/// timer fired first. The watch is unregistered on every exit path,
/// including cancellation of the waiting context: `schedule` never
/// returns into a cancelled context, so the plain post-`schedule` cancel
/// below only covers the ordinary wakeup; the cancellation hook is what
/// covers the other one.
fn wait_for(fd: RawFd, dir: Direction, timeout: Option<Duration>) -> bool {
    ensure_installed();
    let outcome = Rc::new(Cell::new(None));
    let ctx = scheduler::current();
    let deadline = timeout.map(|t| Instant::now() + t);
    let token = IO_REACTOR.with(|r| r.borrow_mut().register(ctx, outcome.clone(), Some((fd, dir)), deadline));
    scheduler::with_scheduler(|s| s.set_suspended(ctx.id()));
    scheduler::suspend_with_cancel_hook(move || {
        IO_REACTOR.with(|r| r.borrow_mut().cancel(token));
    });
    IO_REACTOR.with(|r| r.borrow_mut().cancel(token));
    outcome.get().unwrap_or(false)
}

/// A blocking-looking interface over a non-blocking I/O object.
pub struct Handle<T> {
    io: T,
    timeout: Option<Duration>,
    read_buffer: VecDeque<u8>,
    partial: bool,
}

impl<T: Read + Write + AsRawFd> Handle<T> {
    pub fn new(io: T) -> Self {
        Handle {
            io,
            timeout: None,
            read_buffer: VecDeque::new(),
            partial: false,
        }
    }

    pub fn with_timeout(io: T, timeout: Duration) -> Self {
        let mut h = Self::new(io);
        h.timeout = Some(timeout);
        h
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// When set, `read` returns as soon as any bytes are available
    /// rather than looping until `buf` is full.
    pub fn set_partial(&mut self, partial: bool) {
        self.partial = partial;
    }

    /// Block until the descriptor is readable or `timeout` elapses.
    /// Returns `true` if it became readable, `false` on timeout.
    pub fn readable(&self) -> bool {
        wait_for(self.io.as_raw_fd(), Direction::Read, self.timeout)
    }

    /// Block until the descriptor is writable or `timeout` elapses.
    pub fn writable(&self) -> bool {
        wait_for(self.io.as_raw_fd(), Direction::Write, self.timeout)
    }

    /// Read up to `buf.len()` bytes, suspending on `readable()` whenever
    /// the underlying descriptor would block. Returns the number of
    /// bytes written into `buf`; `0` only at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while !self.read_buffer.is_empty() && filled < buf.len() {
            buf[filled] = self.read_buffer.pop_front().unwrap();
            filled += 1;
        }
        if filled > 0 && self.partial {
            return filled;
        }
        while filled < buf.len() {
            match self.io.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if self.partial {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.readable() {
                        break; // timed out
                    }
                }
                Err(_) => break,
            }
        }
        filled
    }

    /// Write all of `data`, suspending on `writable()` whenever the
    /// descriptor would block. Returns the number of bytes actually
    /// sent, which is less than `data.len()` only on error or timeout.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut sent = 0;
        while sent < data.len() {
            match self.io.write(&data[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.writable() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        sent
    }

    /// Read up to and including `terminator`, suspending as needed.
    /// Returns `None` at EOF with nothing left buffered.
    pub fn readline(&mut self, terminator: u8) -> Option<Vec<u8>> {
        loop {
            if let Some(pos) = self.read_buffer.iter().position(|&b| b == terminator) {
                let line: Vec<u8> = self.read_buffer.drain(..=pos).collect();
                return Some(line);
            }
            let mut chunk = [0u8; 512];
            match self.io.read(&mut chunk) {
                Ok(0) => {
                    return if self.read_buffer.is_empty() {
                        None
                    } else {
                        Some(self.read_buffer.drain(..).collect())
                    };
                }
                Ok(n) => self.read_buffer.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.readable() {
                        return if self.read_buffer.is_empty() {
                            None
                        } else {
                            Some(self.read_buffer.drain(..).collect())
                        };
                    }
                }
                Err(_) => {
                    return if self.read_buffer.is_empty() {
                        None
                    } else {
                        Some(self.read_buffer.drain(..).collect())
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{cede, terminate};
    use std::os::unix::net::UnixStream;

    fn make_pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn read_returns_bytes_written_by_the_peer() {
        let (a, mut b) = make_pair();
        b.write_all(b"hello").unwrap();

        let handle = Context::new(move |_| {
            let mut h = Handle::new(a);
            let mut buf = [0u8; 5];
            let n = h.read(&mut buf);
            assert_eq!(n, 5);
            assert_eq!(&buf, b"hello");
            terminate(Vec::new())
        });
        handle.ready().unwrap();
        cede();
        handle.join();
    }

    #[test]
    fn readable_times_out_when_the_peer_sends_nothing() {
        let (a, _b) = make_pair();
        let handle = Context::new(move |_| {
            let h = Handle::with_timeout(a, Duration::from_millis(5));
            let signalled = h.readable();
            crate::values![signalled]
        });
        handle.ready().unwrap();
        cede();
        assert_eq!(handle.join(), crate::values![false]);
    }

    #[test]
    fn cancelling_a_waiting_context_removes_its_reactor_watch() {
        let (a, _b) = make_pair();
        let fd = a.as_raw_fd();
        let waiter = Context::new(move |_| {
            let h = Handle::new(a);
            h.readable();
            unreachable!("cancelled before the peer ever writes");
        });
        waiter.ready().unwrap();
        cede(); // waiter blocks in readable()
        waiter.cancel(Vec::new());

        let still_watching = IO_REACTOR.with(|r| {
            r.borrow()
                .waits
                .values()
                .any(|w| w.fd == Some((fd, Direction::Read)))
        });
        assert!(!still_watching);
    }
}
