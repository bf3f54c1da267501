use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use opencv::highgui::{imshow, wait_key};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use crate::error::Result;

/// An image waiting to be shown by the [`DebugWindow`].
pub struct DebugFrame {
    pub title: String,
    pub image: Mat,
    /// Set when the sender waits for a key press before going on.
    shown: Option<Sender<()>>,
}

unsafe impl Send for DebugFrame {}

/// Hands intermediate images of the pipeline over to a [`DebugWindow`].
///
/// HighGUI must only be driven from one thread, so the nodes never call it
/// themselves. A disabled view drops every image.
#[derive(Clone, Default)]
pub struct DebugView {
    frames: Option<Sender<DebugFrame>>,
}

impl DebugView {
    /// A view feeding the returned window.
    pub fn channel() -> (Self, DebugWindow) {
        let (frames_s, frames_r) = unbounded();
        (
            Self {
                frames: Some(frames_s),
            },
            DebugWindow { frames: frames_r },
        )
    }

    pub fn enabled(&self) -> bool {
        self.frames.is_some()
    }

    /// Queues `image` for display in a window named `title`. With `wait`
    /// set, blocks until the window saw a key press.
    pub fn show(&self, title: &str, image: &Mat, wait: bool) -> Result<()> {
        let Some(frames) = self.frames.as_ref() else {
            return Ok(());
        };

        let (shown, key_pressed) = if wait {
            let (shown_s, shown_r) = bounded(1);
            (Some(shown_s), Some(shown_r))
        } else {
            (None, None)
        };

        let frame = DebugFrame {
            title: title.to_string(),
            image: image.try_clone()?,
            shown,
        };
        if frames.send(frame).is_err() {
            tracing::warn!("Debug window is closed, not showing {}", title);
            return Ok(());
        }

        if let Some(key_pressed) = key_pressed {
            // An error means the window went away without showing it.
            let _ = key_pressed.recv();
        }
        Ok(())
    }
}

/// Shows the frames queued by every [`DebugView`] clone. Lives on the thread
/// that owns HighGUI.
pub struct DebugWindow {
    frames: Receiver<DebugFrame>,
}

impl DebugWindow {
    fn display(&self, frame: DebugFrame) -> Result<()> {
        if !frame.image.empty() {
            imshow(&frame.title, &frame.image)?;
            wait_key(if frame.shown.is_some() { 0 } else { 1 })?;
        }
        if let Some(shown) = frame.shown {
            let _ = shown.send(());
        }
        Ok(())
    }

    /// Shows queued frames until a message arrives on `done`, then returns
    /// it. Returns `None` once `done` is disconnected.
    pub fn display_until<T>(&self, done: &Receiver<T>) -> Result<Option<T>> {
        loop {
            select! {
                recv(done) -> message => return Ok(message.ok()),
                recv(self.frames) -> frame => match frame {
                    Ok(frame) => self.display(frame)?,
                    Err(_) => return Ok(done.recv().ok()),
                },
            }
        }
    }
}
