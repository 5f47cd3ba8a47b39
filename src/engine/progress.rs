//! Progress counter for the export (kdam).

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Counter with no known total; shows count and rate.
pub fn create_counter(desc: &'static str, unit: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = unit
    )))
}

/// Advance by `n`. Only the collector thread calls this, so the lock is never contended.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    let mut bar = pb.lock().unwrap_or_else(|p| p.into_inner());
    let _ = bar.update(n);
}

/// Leave the final count on screen and move to a fresh line.
pub fn finish_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.refresh();
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_update_is_counted() {
        let pb = create_counter("Testing", " items");
        for n in [100, 100, 34] {
            update_progress_bar(&pb, n);
        }

        // An update that arrives while the bar is locked waits instead of being lost.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let pb = Arc::clone(&pb);
            std::thread::spawn(move || {
                let _held = pb.lock().unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(30));
            })
        };
        locked_rx.recv().unwrap();
        update_progress_bar(&pb, 6);
        holder.join().unwrap();

        let held = pb.lock().unwrap();
        assert_eq!(held.counter, 240);
    }
}
