macro_rules! rtrace {
    ($($tt:tt)*) => {
        tracing::trace!(target: "floors::runtime", $($tt)*)
    };
}

macro_rules! rdebug {
    ($($tt:tt)*) => {
        tracing::debug!(target: "floors::runtime", $($tt)*)
    };
}

macro_rules! rwarn {
    ($($tt:tt)*) => {
        tracing::warn!(target: "floors::runtime", $($tt)*)
    };
}

macro_rules! rerror {
    ($($tt:tt)*) => {
        tracing::error!(target: "floors::runtime", $($tt)*)
    };
}
