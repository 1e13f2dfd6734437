// the graph logs through these so that builds without `build-tracing` carry no logging at all

macro_rules! generate {
    ($dollar:tt, $($name:ident),*) => {
        $(
            #[cfg(feature = "build-tracing")]
            #[macro_export]
            macro_rules! $name {
                ($dollar ($dollar any:tt)*) => {
                    tracing::$name!($dollar ($dollar any)*)
                }
            }

            #[cfg(not(feature = "build-tracing"))]
            #[macro_export]
            macro_rules! $name {
                ($dollar ($dollar any:tt)*) => {}
            }

            pub use $name;
        )+
    }
}

generate! {$, trace, debug, info, error}

// `warn` collides with the builtin lint attribute when exported from the crate root
#[cfg(feature = "build-tracing")]
#[macro_export]
macro_rules! warn_ {
    ($($any:tt)*) => {
        tracing::warn!($($any)*)
    }
}
#[cfg(not(feature = "build-tracing"))]
#[macro_export]
macro_rules! warn_ {
    ($($any:tt)*) => {};
}
pub use warn_ as warn;
