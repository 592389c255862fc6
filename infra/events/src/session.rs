use crate::error::{EventBusError, Result};
use parking_lot::Mutex;

/// A backend handle that `close` takes away for good.
///
/// Operations clone the handle out of the slot, so a close that races an in-flight call
/// lets that call finish while every later one fails.
#[derive(Debug)]
pub(crate) struct Session<T> {
    handle: Mutex<Option<T>>,
}

impl<T: Clone> Session<T> {
    pub(crate) fn new(handle: T) -> Self {
        Self { handle: Mutex::new(Some(handle)) }
    }

    /// The live handle, or a transport error once the session is closed.
    pub(crate) fn get(&self) -> Result<T> {
        self.handle.lock().clone().ok_or_else(|| EventBusError::transport("connection closed"))
    }

    /// Removes the handle. `None` when it was already taken.
    pub(crate) fn take(&self) -> Option<T> {
        self.handle.lock().take()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn take_releases_the_handle() {
        let handle = Arc::new(());
        let session = Session::new(Arc::clone(&handle));
        assert_eq!(Arc::strong_count(&handle), 2);

        let taken = session.take();
        assert!(taken.is_some());
        drop(taken);
        assert_eq!(Arc::strong_count(&handle), 1, "closed session keeps no reference");
        assert!(!session.is_open());
    }

    #[test]
    fn closed_session_refuses_work() {
        let session = Session::new(7_u8);
        assert_eq!(session.get().unwrap(), 7);

        session.take();
        let err = session.get().unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("connection closed"));
        assert!(session.take().is_none(), "second close finds nothing");
    }

    #[test]
    fn handles_cloned_before_close_stay_usable() {
        let session = Session::new(Arc::new(String::from("conn")));
        let in_flight = session.get().unwrap();
        session.take();
        assert_eq!(in_flight.as_str(), "conn");
    }
}
