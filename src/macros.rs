pub use enclose::*;

/// Build a [`Computed`](crate::Computed) from a block, cloning the listed
/// handles into it.
///
/// ```ignore
/// let total = computed!((price, quantity) => price.get() * quantity.get());
/// ```
#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::Computed::new($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::Computed::new(move || { $($b)* })
    };
}

/// Same as [`computed!`] but builds a pure computed.
#[macro_export]
macro_rules! pure_computed {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::Computed::pure($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::Computed::pure(move || { $($b)* })
    };
}
