use super::{ControlEvent, ControlHandle, ShutdownReason};
use crate::detection::Algorithm;
use crate::device::Orientation;
use crate::status::StatusSnapshot;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Raw-mode keyboard control of a running controller
pub struct KeyboardInputHandler {
    handle: ControlHandle,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(handle: ControlHandle) -> Self {
        Self {
            handle,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub fn start(&self) {
        info!(
            "Keyboard controls: s start/stop camera, d toggle detection, t test capture, \
             f/r front/rear, 1-3 algorithm, q quit"
        );

        let handle = self.handle.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(control) = map_key(key_event.code, &handle.snapshot()) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };
                        let quitting = matches!(control, ControlEvent::Shutdown(_));

                        if let Err(e) = handle.blocking_send(control) {
                            warn!("Failed to forward key press: {}", e);
                            break;
                        }
                        if quitting {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
        });
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) {
        self.cancellation_token.cancel();

        // Give the task a moment to leave raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();
    }
}

/// Translate a key press into a controller event, given what is running now
pub fn map_key(code: KeyCode, snapshot: &StatusSnapshot) -> Option<ControlEvent> {
    match code {
        KeyCode::Char('s') => Some(if snapshot.session.is_busy() {
            ControlEvent::StopCamera
        } else {
            ControlEvent::StartCamera
        }),
        KeyCode::Char('d') => Some(if snapshot.detection.active {
            ControlEvent::DisableDetection
        } else {
            ControlEvent::EnableDetection
        }),
        KeyCode::Char('t') => Some(ControlEvent::TestCapture),
        KeyCode::Char('f') => Some(ControlEvent::SelectOrientation(Orientation::Front)),
        KeyCode::Char('r') => Some(ControlEvent::SelectOrientation(Orientation::Rear)),
        KeyCode::Char('1') => Some(ControlEvent::ChangeAlgorithm(Algorithm::Threshold)),
        KeyCode::Char('2') => Some(ControlEvent::ChangeAlgorithm(Algorithm::EdgeDetection)),
        KeyCode::Char('3') => Some(ControlEvent::ChangeAlgorithm(Algorithm::ObjectDetection)),
        KeyCode::Char('q') | KeyCode::Esc => {
            info!("Quit key pressed - requesting shutdown");
            Some(ControlEvent::Shutdown(ShutdownReason::UserRequest))
        }
        _ => None,
    }
}
