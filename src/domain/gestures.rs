//! Gesture classification for a single button.
//!
//! Raw edges are buffered into an interaction window that stays open as long
//! as edges keep arriving within the quiet period. When the quiet timer fires
//! the window is closed and classified.
//!
//! ```text
//! IDLE      --(edge)--> BUFFERING   start window, arm timer
//! BUFFERING --(edge)--> BUFFERING   append, re-arm timer
//! BUFFERING --(timer)-> IDLE        close, classify, emit if non-empty
//! ```

use crate::domain::models::{EdgeEvent, GestureRecord};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Quiet period after which a window is considered closed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
enum WindowState {
    Idle,
    Buffering(Vec<EdgeEvent>),
}

/// Drop leading `Up` edges left over from a press that started before the
/// observer attached.
pub fn trim_window(edges: &[EdgeEvent]) -> &[EdgeEvent] {
    // Every leading Up goes, not just the first, so trimming twice is a no-op
    let skip = edges
        .iter()
        .take_while(|edge| **edge == EdgeEvent::Up)
        .count();
    &edges[skip..]
}

/// Trim and count a closed window. Returns `None` when nothing is left.
pub fn classify_window(edges: &[EdgeEvent]) -> Option<GestureRecord> {
    let trimmed = trim_window(edges);
    if trimmed.is_empty() {
        return None;
    }
    Some(GestureRecord::from_edges(trimmed))
}

pub struct GestureClassifier {
    state: WindowState,
    debounce: Duration,
}

impl GestureClassifier {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: WindowState::Idle,
            debounce,
        }
    }

    pub fn is_buffering(&self) -> bool {
        matches!(self.state, WindowState::Buffering(_))
    }

    /// Buffer an edge into the current window, opening one if idle
    pub fn push(&mut self, edge: EdgeEvent) {
        match &mut self.state {
            WindowState::Idle => self.state = WindowState::Buffering(vec![edge]),
            WindowState::Buffering(edges) => edges.push(edge),
        }
    }

    /// Quiet period elapsed: close the window and classify it
    pub fn close_window(&mut self) -> Option<GestureRecord> {
        let edges = match std::mem::replace(&mut self.state, WindowState::Idle) {
            WindowState::Idle => return None,
            WindowState::Buffering(edges) => edges,
        };

        let record = classify_window(&edges);
        if record.is_none() {
            trace!("Discarding window with no edges after trimming: {:?}", edges);
        }
        record
    }

    /// Drive the automaton from a live edge stream until the stream ends.
    ///
    /// Any window still buffering when the stream closes is dropped.
    pub async fn run<F>(mut self, mut edges: mpsc::UnboundedReceiver<EdgeEvent>, mut on_gesture: F)
    where
        F: FnMut(GestureRecord),
    {
        let quiet = tokio::time::sleep(self.debounce);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                edge = edges.recv() => match edge {
                    Some(edge) => {
                        trace!("Edge received: {:?}", edge);
                        self.push(edge);
                        quiet.as_mut().reset(Instant::now() + self.debounce);
                    }
                    None => {
                        if self.is_buffering() {
                            debug!("Edge stream closed mid-window, pending edges dropped");
                        }
                        break;
                    }
                },
                () = &mut quiet, if self.is_buffering() => {
                    if let Some(record) = self.close_window() {
                        debug!(
                            "Gesture {} (down: {}, up: {})",
                            record.press_type(),
                            record.num_down,
                            record.num_up
                        );
                        on_gesture(record);
                    }
                }
            }
        }
    }
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PressType;
    use EdgeEvent::{Down, Up};

    fn spawn_classifier() -> (
        mpsc::UnboundedSender<EdgeEvent>,
        mpsc::UnboundedReceiver<GestureRecord>,
        tokio::task::JoinHandle<()>,
    ) {
        let (edge_tx, edge_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(GestureClassifier::default().run(edge_rx, move |record| {
            let _ = out_tx.send(record);
        }));
        (edge_tx, out_rx, handle)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_balanced_window_is_press() {
        let windows: [&[EdgeEvent]; 3] = [
            &[Down, Up],
            &[Down, Up, Down, Up],
            &[Down, Up, Down, Up, Down, Up, Down, Up],
        ];
        for window in windows {
            let press = classify_window(window).unwrap().press_type();
            assert_eq!(press, PressType::new(window.len() as u32 / 2, false));
        }
    }

    #[test]
    fn test_unbalanced_window_is_hold() {
        assert_eq!(
            classify_window(&[Down]).unwrap().press_type(),
            PressType::SINGLE_HOLD
        );
        assert_eq!(
            classify_window(&[Down, Up, Down]).unwrap().press_type(),
            PressType::DOUBLE_HOLD
        );
        assert_eq!(
            classify_window(&[Down, Up, Down, Up, Down])
                .unwrap()
                .press_type(),
            PressType::TRIPLE_HOLD
        );
    }

    #[test]
    fn test_trim_is_idempotent() {
        let windows: [&[EdgeEvent]; 5] = [
            &[Up, Down, Up],
            &[Up, Up, Down],
            &[Up],
            &[Down, Up],
            &[],
        ];
        for window in windows {
            let once = trim_window(window);
            assert_eq!(trim_window(once), once);
        }
    }

    #[test]
    fn test_leading_up_is_dropped() {
        assert_eq!(trim_window(&[Up, Down, Up]), &[Down, Up]);
        assert_eq!(
            classify_window(&[Up, Down, Up]).unwrap().press_type(),
            PressType::SINGLE
        );
    }

    #[test]
    fn test_repeated_leading_ups_are_dropped() {
        assert_eq!(trim_window(&[Up, Up, Down, Up]), &[Down, Up]);
        assert_eq!(
            classify_window(&[Up, Up, Down, Up]).unwrap().press_type(),
            PressType::SINGLE
        );
    }

    #[test]
    fn test_lone_up_window_is_discarded() {
        assert_eq!(classify_window(&[Up]), None);

        let mut classifier = GestureClassifier::default();
        classifier.push(Up);
        assert!(classifier.is_buffering());
        assert_eq!(classifier.close_window(), None);
        assert!(!classifier.is_buffering());
    }

    #[test]
    fn test_close_while_idle_emits_nothing() {
        let mut classifier = GestureClassifier::default();
        assert_eq!(classifier.close_window(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_press_within_window() {
        let (tx, mut rx, _handle) = spawn_classifier();
        tx.send(Down).unwrap();
        tokio::time::sleep(ms(100)).await;
        tx.send(Up).unwrap();

        tokio::time::sleep(ms(350)).await;
        let record = rx.try_recv().unwrap();
        assert_eq!(record.press_type(), PressType::SINGLE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_on_each_edge() {
        let (tx, mut rx, _handle) = spawn_classifier();
        for edge in [Down, Up, Down, Up] {
            tx.send(edge).unwrap();
            tokio::time::sleep(ms(250)).await;
            assert!(rx.try_recv().is_err());
        }

        tokio::time::sleep(ms(100)).await;
        assert_eq!(rx.try_recv().unwrap().press_type(), PressType::DOUBLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spurious_leading_up() {
        let (tx, mut rx, _handle) = spawn_classifier();
        for edge in [Up, Down, Up] {
            tx.send(edge).unwrap();
        }

        tokio::time::sleep(ms(350)).await;
        assert_eq!(rx.try_recv().unwrap().press_type(), PressType::SINGLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_button_reports_hold() {
        let (tx, mut rx, _handle) = spawn_classifier();
        tx.send(Down).unwrap();

        tokio::time::sleep(ms(350)).await;
        let record = rx.try_recv().unwrap();
        assert_eq!(record, GestureRecord { num_down: 1, num_up: 0 });
        assert_eq!(record.press_type(), PressType::SINGLE_HOLD);

        // The release arrives alone in the next window and is discarded.
        tx.send(Up).unwrap();
        tokio::time::sleep(ms(350)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_emit_separately() {
        let (tx, mut rx, _handle) = spawn_classifier();
        for _ in 0..2 {
            tx.send(Down).unwrap();
            tx.send(Up).unwrap();
            tokio::time::sleep(ms(400)).await;
        }

        assert_eq!(rx.try_recv().unwrap().press_type(), PressType::SINGLE);
        assert_eq!(rx.try_recv().unwrap().press_type(), PressType::SINGLE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_close_drops_pending_window() {
        let (tx, mut rx, handle) = spawn_classifier();
        tx.send(Down).unwrap();
        tx.send(Up).unwrap();
        drop(tx);

        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
