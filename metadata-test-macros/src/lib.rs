/// Waits for the next message in `$queue` and checks it matches `$pattern`.
/// The expansion refers to `::tokio` and `::std` so callers only need tokio
/// with the `time` feature in their own dependencies.
#[macro_export]
macro_rules! assert_message {
    (($var:ident :: $pattern:pat_param in $queue:ident | $timeout:literal) => $e:expr) => {
        let value = ::tokio::time::timeout(
            ::std::time::Duration::from_millis($timeout),
            $queue.recv(),
        )
        .await
        .expect(format!("No messages of type {} found", stringify!($pattern)).as_str());
        assert!(value.is_some(), "Trying to read from a closed channel!");
        let $var = value.unwrap();
        assert!(
            matches!($var, $pattern),
            "Got wrong message {:?}, expected of type {}",
            $var,
            stringify!($pattern)
        );
        $e
    };

    (($var:ident :: $pattern:pat_param in $queue:ident) => $e:expr) => {
        $crate::assert_message! {
            ($var :: $pattern in $queue | 1000) => $e
        }
    };

    ($var:ident :: $pattern:pat_param in $queue:ident | $timeout:literal) => {
        $crate::assert_message! {
            ($var :: $pattern in $queue | $timeout) => {}
        }
    };

    ($var:ident :: $pattern:pat_param in $queue:ident) => {
        $crate::assert_message! {
            ($var :: $pattern in $queue | 1000) => {}
        }
    };
}

/// Checks that nothing arrives in `$queue` for `$timeout` milliseconds.
#[macro_export]
macro_rules! assert_no_message {
    ($queue:ident | $timeout:literal) => {
        let value = ::tokio::time::timeout(
            ::std::time::Duration::from_millis($timeout),
            $queue.recv(),
        )
        .await;
        match value {
            Ok(Some(v)) => {
                assert!(false, "Expected not messages in queue, found {:?}", v);
            }
            Ok(None) => {
                assert!(false, "Trying to read from a closed channel!");
            }
            _ => (),
        }
    };

    ($queue:ident) => {
        $crate::assert_no_message!($queue | 1000);
    };
}
