//! Shared helpers for the loopback integration tests. Not every test file
//! uses every helper.
#![allow(dead_code)]

use sockflow::endpoint::Endpoint;

/// Accepts exactly one flow on the listener, retrying across readiness
/// timeouts; panics if no peer arrives within ~50 waits.
pub fn accept_one(listener: &mut Endpoint) -> Endpoint {
    for _ in 0..50 {
        match listener.accept(1) {
            Ok(Some(flow)) => return flow,
            Ok(None) => {}
            Err(e) => panic!("accept failed: {}", e),
        }
    }
    panic!("no connection accepted");
}

/// Drives the connect state machine to completion.
pub fn connect_blocking(ep: &mut Endpoint) {
    for _ in 0..50 {
        match ep.connect() {
            Ok(true) => return,
            Ok(false) => std::thread::sleep(std::time::Duration::from_millis(10)),
            Err(e) => panic!("connect failed: {}", e),
        }
    }
    panic!("connect did not complete");
}
