//! Pixel grid back-ends.
//!
//! Loops only see [`Screen`]. [`FrameBuffer`] keeps the grid in memory and is
//! what tests inspect; [`TerminalScreen`] draws the same buffer with ANSI
//! truecolor blocks.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::DisplayError;
use crate::models::{Color, Coordinate};

/// Display collaborator shared by every loop.
pub trait Screen: Send + Sync {
    /// Sets one cell. Setting the same color twice is a no-op for the visible state.
    fn set_pixel(&self, at: Coordinate, color: Color) -> Result<(), DisplayError>;

    /// Renders a scrolling message. Blocks until the scroll finishes.
    fn show_message(&self, text: &str, color: Color, scroll_speed: f32) -> Result<(), DisplayError>;
}

const HISTORY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWrite {
    pub at: Coordinate,
    pub color: Color,
    pub when: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub color: Color,
}

#[derive(Debug)]
struct FrameState {
    pixels: Vec<Color>,
    writes: VecDeque<PixelWrite>,
    messages: VecDeque<Message>,
}

/// In-memory grid with a bounded history of writes and messages.
#[derive(Debug)]
pub struct FrameBuffer {
    width: u8,
    height: u8,
    state: Mutex<FrameState>,
}

impl FrameBuffer {
    pub fn new(width: u8, height: u8) -> Self {
        Self {
            width,
            height,
            state: Mutex::new(FrameState {
                pixels: vec![Color::OFF; usize::from(width) * usize::from(height)],
                writes: VecDeque::new(),
                messages: VecDeque::new(),
            }),
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index(&self, at: Coordinate) -> Result<usize, DisplayError> {
        match at.cell() {
            Some((col, row)) if col < usize::from(self.width) && row < usize::from(self.height) => {
                Ok(row * usize::from(self.width) + col)
            }
            _ => Err(DisplayError::OutOfBounds {
                at,
                width: self.width,
                height: self.height,
            }),
        }
    }

    pub fn pixel(&self, at: Coordinate) -> Option<Color> {
        let idx = self.index(at).ok()?;
        Some(self.lock().pixels[idx])
    }

    /// Row-major copy of the grid.
    pub fn pixels(&self) -> Vec<Color> {
        self.lock().pixels.clone()
    }

    /// Recorded writes to `at`, oldest first.
    pub fn writes_at(&self, at: Coordinate) -> Vec<PixelWrite> {
        self.lock().writes.iter().filter(|w| w.at == at).copied().collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.iter().cloned().collect()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.lock().messages.back().cloned()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) {
    if queue.len() == HISTORY_LIMIT {
        queue.pop_front();
    }
    queue.push_back(item);
}

impl Screen for FrameBuffer {
    fn set_pixel(&self, at: Coordinate, color: Color) -> Result<(), DisplayError> {
        let idx = self.index(at)?;
        let mut state = self.lock();
        state.pixels[idx] = color;
        push_bounded(&mut state.writes, PixelWrite { at, color, when: Instant::now() });
        debug!(%at, ?color, "set pixel");
        Ok(())
    }

    fn show_message(
        &self,
        text: &str,
        color: Color,
        _scroll_speed: f32,
    ) -> Result<(), DisplayError> {
        let message = Message { text: text.to_string(), color };
        push_bounded(&mut self.lock().messages, message);
        debug!(text, ?color, "show message");
        Ok(())
    }
}

/// Pixel columns one character occupies while scrolling (glyph plus gap).
const COLUMNS_PER_CHAR: u32 = 6;

/// Delay between scroll frames. Unrepresentable speeds scroll without delay.
fn scroll_step(scroll_speed: f32) -> Duration {
    Duration::try_from_secs_f32(scroll_speed)
        .ok()
        .and_then(|column| column.checked_mul(COLUMNS_PER_CHAR))
        .unwrap_or_default()
}

/// ANSI terminal rendering of a [`FrameBuffer`].
pub struct TerminalScreen {
    frame: FrameBuffer,
}

impl TerminalScreen {
    pub fn new(width: u8, height: u8) -> Result<Self, DisplayError> {
        enable_ansi();
        let screen = Self { frame: FrameBuffer::new(width, height) };
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x1b[2J")?;
        screen.draw_grid(&mut out)?;
        Ok(screen)
    }

    fn draw_grid(&self, out: &mut impl Write) -> std::io::Result<()> {
        let pixels = self.frame.pixels();
        let mut buf = String::from("\x1b[H");
        for row in pixels.chunks(usize::from(self.frame.width())) {
            for Color(r, g, b) in row {
                buf.push_str(&format!("\x1b[38;2;{r};{g};{b}m\u{2588}\u{2588}"));
            }
            buf.push_str("\x1b[0m\n");
        }
        out.write_all(buf.as_bytes())?;
        out.flush()
    }

    fn draw_message_frame(&self, window: &str, color: Color) -> std::io::Result<()> {
        let Color(r, g, b) = color;
        let row = u32::from(self.frame.height()) + 2;
        let mut out = std::io::stdout().lock();
        write!(out, "\x1b[{row};1H\x1b[2K\x1b[38;2;{r};{g};{b}m{window}\x1b[0m")?;
        out.flush()
    }
}

impl Screen for TerminalScreen {
    fn set_pixel(&self, at: Coordinate, color: Color) -> Result<(), DisplayError> {
        self.frame.set_pixel(at, color)?;
        self.draw_grid(&mut std::io::stdout().lock())?;
        Ok(())
    }

    fn show_message(
        &self,
        text: &str,
        color: Color,
        scroll_speed: f32,
    ) -> Result<(), DisplayError> {
        self.frame.show_message(text, color, scroll_speed)?;

        let visible = usize::from(self.frame.width()) * 2;
        let padded: Vec<char> = " ".repeat(visible)
            .chars()
            .chain(text.chars())
            .chain(" ".repeat(visible).chars())
            .collect();
        let step = scroll_step(scroll_speed);

        for start in 0..=padded.len().saturating_sub(visible) {
            let window: String = padded[start..start + visible].iter().collect();
            self.draw_message_frame(&window, color)?;
            std::thread::sleep(step);
        }
        self.draw_message_frame("", color)?;
        Ok(())
    }
}

#[cfg(windows)]
fn enable_ansi() {
    use windows_sys::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, SetConsoleOutputCP,
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_OUTPUT_HANDLE,
    };
    // SAFETY: plain console API calls on this process's own stdout handle.
    unsafe {
        SetConsoleOutputCP(65001);
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut mode = 0;
        if GetConsoleMode(handle, &mut mode) != 0 {
            SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
        }
    }
}

#[cfg(not(windows))]
fn enable_ansi() {}
