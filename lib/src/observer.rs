/// Something a session reports to its observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    Start {
        position: u64,
        length: Option<u64>,
        is_network: bool,
    },
    Bytes {
        count: usize,
        is_network: bool,
    },
    End {
        is_network: bool,
    },
}

/// Receives transfer events from a session, in the order they happen.
///
/// `source` is the session's upstream identifier. Observers registered late
/// miss earlier events; nothing is replayed.
pub trait TransferObserver {
    fn on_transfer(&mut self, source: &str, event: &TransferEvent);
}

impl<F> TransferObserver for F
where
    F: FnMut(&str, &TransferEvent),
{
    fn on_transfer(&mut self, source: &str, event: &TransferEvent) {
        (*self)(source, event)
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    observers: Vec<Box<dyn TransferObserver + Send>>,
}

impl Observers {
    pub(crate) fn register(&mut self, observer: Box<dyn TransferObserver + Send>) {
        self.observers.push(observer);
    }

    pub(crate) fn notify(&mut self, source: &str, event: TransferEvent) {
        for observer in &mut self.observers {
            observer.on_transfer(source, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fan_out_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::default();
        for id in 0..2 {
            let seen = seen.clone();
            observers.register(Box::new(move |source: &str, event: &TransferEvent| {
                seen.lock().unwrap().push((id, source.to_string(), *event));
            }));
        }
        observers.notify("a", TransferEvent::Bytes { count: 3, is_network: false });
        observers.notify("a", TransferEvent::End { is_network: false });

        let bytes = TransferEvent::Bytes { count: 3, is_network: false };
        let end = TransferEvent::End { is_network: false };
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0, "a".to_string(), bytes),
                (1, "a".to_string(), bytes),
                (0, "a".to_string(), end),
                (1, "a".to_string(), end),
            ]
        );
    }
}
