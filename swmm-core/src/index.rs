//! Index newtypes for the catalogs (§3).
//!
//! The teacher hand-writes a `NodeIndex`/`EdgeIndex`/`ParameterIndex` newtype per
//! catalog, each wrapping a `usize` behind `Deref`/`Display`/`Copy`. Every catalog here
//! (subcatchments, gages, nodes, links) needs the identical wrapper, so it is factored
//! into one macro rather than copied four times.
#[macro_export]
macro_rules! define_index {
    ($name:ident) => {
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
        pub struct $name(usize);

        impl $name {
            pub fn new(i: usize) -> Self {
                Self(i)
            }

            pub fn value(&self) -> usize {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = usize;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
