//! Single-threaded readiness loop
//!
//! Every descriptor the daemon waits on (bus wake-up socket, udev monitors,
//! transition timers, the shutdown signal pipe) is registered here under a
//! token. `poll` waits once, acknowledges timer expirations, and hands back
//! the ready sources in the order the kernel reported them. Dispatch is the
//! caller's job; a source deregistered earlier in the same cycle is dropped
//! from the batch rather than dispatched.
use crate::error::Error;
use crate::plugin::Capability;
use log::debug;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::collections::HashMap;
use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Registration handle returned by the loop
pub type Token = u64;

/// What a ready descriptor belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// SIGINT/SIGTERM arrived
    Shutdown,
    /// Bus transport has queued method calls
    Bus,
    /// A hot-plug monitor of `capability`, by monitor index
    Hotplug { capability: Capability, index: usize },
    /// Transition tick for one device of `capability`
    Tick { capability: Capability, id: String },
}

enum Registration {
    Fd(Source),
    Timer(Source, TimerFd),
}

impl Registration {
    fn source(&self) -> &Source {
        match self {
            Registration::Fd(source) | Registration::Timer(source, _) => source,
        }
    }
}

pub struct EventLoop {
    epoll: Epoll,
    next_token: Token,
    sources: HashMap<Token, Registration>,
    running: bool,
}

impl EventLoop {
    pub fn new() -> Result<Self, Error> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self {
            epoll,
            next_token: 1,
            sources: HashMap::new(),
            running: true,
        })
    }

    fn allocate(&mut self) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Watch a descriptor owned by the caller
    ///
    /// The caller must call [`EventLoop::deregister`] before closing `fd`.
    pub fn register<F: AsFd>(&mut self, fd: &F, source: Source) -> Result<Token, Error> {
        let token = self.allocate();
        self.epoll
            .add(fd, EpollEvent::new(EpollFlags::EPOLLIN, token))?;
        debug!("Registered {:?} as token {}", source, token);
        self.sources.insert(token, Registration::Fd(source));
        Ok(token)
    }

    /// Stop watching a caller-owned descriptor
    pub fn deregister<F: AsFd>(&mut self, token: Token, fd: &F) -> Result<(), Error> {
        if self.sources.remove(&token).is_some() {
            self.epoll.delete(fd)?;
        }
        Ok(())
    }

    /// Create a loop-owned periodic timer
    ///
    /// The first expiration happens immediately, later ones every `interval`.
    pub fn add_timer(&mut self, interval: Duration, source: Source) -> Result<Token, Error> {
        let timer = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;
        // A zero initial value would disarm the timer
        timer.set(
            Expiration::IntervalDelayed(
                TimeSpec::from_duration(Duration::from_nanos(1)),
                TimeSpec::from_duration(interval),
            ),
            TimerSetTimeFlags::empty(),
        )?;

        let token = self.allocate();
        self.epoll
            .add(&timer, EpollEvent::new(EpollFlags::EPOLLIN, token))?;
        self.sources.insert(token, Registration::Timer(source, timer));
        Ok(token)
    }

    /// Deregister and close a loop-owned timer
    pub fn remove_timer(&mut self, token: Token) -> Result<(), Error> {
        if let Some(Registration::Timer(_, timer)) = self.sources.remove(&token) {
            self.epoll.delete(&timer)?;
        }
        Ok(())
    }

    pub fn contains(&self, token: Token) -> bool {
        self.sources.contains_key(&token)
    }

    pub fn source(&self, token: Token) -> Option<&Source> {
        self.sources.get(&token).map(Registration::source)
    }

    /// Number of live timers
    pub fn timers(&self) -> usize {
        self.sources
            .values()
            .filter(|r| matches!(r, Registration::Timer(..)))
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the loop to stop after the current cycle
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Wait for readiness and return ready sources
    ///
    /// `timeout` of `None` blocks until something is ready. An interrupted
    /// wait returns an empty batch.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(Token, Source)>, Error> {
        let mut events = [EpollEvent::empty(); 32];
        let timeout = match timeout {
            Some(t) => EpollTimeout::from(u16::try_from(t.as_millis()).unwrap_or(u16::MAX)),
            None => EpollTimeout::NONE,
        };

        let ready = match self.epoll.wait(&mut events, timeout) {
            Ok(n) => n,
            Err(nix::Error::EINTR) => 0,
            Err(e) => return Err(e.into()),
        };

        let mut batch = Vec::with_capacity(ready);
        for event in &events[..ready] {
            let token = event.data();
            match self.sources.get(&token) {
                Some(Registration::Timer(source, timer)) => {
                    // Acknowledge the expiration so the timer stops being readable
                    if let Err(e) = timer.wait()
                        && e != nix::Error::EAGAIN
                    {
                        return Err(e.into());
                    }
                    batch.push((token, source.clone()));
                }
                Some(Registration::Fd(source)) => batch.push((token, source.clone())),
                None => {}
            }
        }
        Ok(batch)
    }
}

/// Self-pipe carrying SIGINT/SIGTERM into the loop
pub struct ShutdownSignal {
    read: UnixStream,
}

impl ShutdownSignal {
    /// Route SIGINT and SIGTERM to a readable descriptor
    pub fn install() -> Result<Self, Error> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;

        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            let writer = write.try_clone()?;
            signal_hook::low_level::pipe::register(signal, writer).map_err(|e| {
                Error::SignalError(format!("Failed to install handler for {}: {}", signal, e))
            })?;
        }

        Ok(Self { read })
    }

    /// Consume pending wake-up bytes
    pub fn drain(&mut self) {
        let mut buf = [0u8; 64];
        while matches!(self.read.read(&mut buf), Ok(n) if n > 0) {}
    }
}

impl AsFd for ShutdownSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tick(id: &str) -> Source {
        Source::Tick {
            capability: Capability::Backlight,
            id: id.to_string(),
        }
    }

    #[test]
    fn timer_fires_immediately_then_periodically() {
        let mut events = EventLoop::new().unwrap();
        let token = events
            .add_timer(Duration::from_millis(20), tick("panel"))
            .unwrap();

        let first = events.poll(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(first, vec![(token, tick("panel"))]);

        let second = events.poll(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(second, vec![(token, tick("panel"))]);
    }

    #[test]
    fn removed_timer_is_closed_and_silent() {
        let mut events = EventLoop::new().unwrap();
        let token = events
            .add_timer(Duration::from_millis(5), tick("panel"))
            .unwrap();
        assert_eq!(events.timers(), 1);

        events.remove_timer(token).unwrap();
        assert_eq!(events.timers(), 0);
        assert!(!events.contains(token));
        assert!(events.poll(Some(Duration::from_millis(30))).unwrap().is_empty());
    }

    #[test]
    fn registered_fd_reports_readiness() {
        let mut events = EventLoop::new().unwrap();
        let (read, mut write) = UnixStream::pair().unwrap();
        let token = events.register(&read, Source::Bus).unwrap();

        assert!(events.poll(Some(Duration::ZERO)).unwrap().is_empty());
        write.write_all(b"x").unwrap();
        assert_eq!(
            events.poll(Some(Duration::from_millis(100))).unwrap(),
            vec![(token, Source::Bus)]
        );

        events.deregister(token, &read).unwrap();
        assert!(events.poll(Some(Duration::ZERO)).unwrap().is_empty());
    }

    #[test]
    fn tokens_are_unique() {
        let mut events = EventLoop::new().unwrap();
        let a = events.add_timer(Duration::from_secs(60), tick("a")).unwrap();
        let b = events.add_timer(Duration::from_secs(60), tick("b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(events.source(a), Some(&tick("a")));
    }

    #[test]
    fn quit_stops_running() {
        let mut events = EventLoop::new().unwrap();
        assert!(events.is_running());
        events.quit();
        assert!(!events.is_running());
    }
}
