//! Declares a function-pointer service seam between crates that cannot
//! otherwise depend on each other.
//!
//! `define_service!` expands a table of method signatures into:
//!
//! - a plain struct of `fn` pointers (`$Services`)
//! - a `ServiceCell<$Services>` static holding the registered instance
//! - a `<name>_services()` accessor and a `register_<name>_services()` setter
//! - a thin wrapper function per method, so callers write `current_task()`
//!   instead of `driver_runtime_services().current_task()`
//!
//! Mark a method `@no_wrapper` to skip the generated wrapper when the
//! caller needs a different signature (e.g. taking `&[u8]` instead of a
//! pointer+length pair) and provides its own.
#[macro_export]
macro_rules! define_service {
    (
        $mod_name:ident => $Services:ident {
            $( $(#[$meta:meta])* $(@$attr:ident)? $method:ident ( $($arg:ident : $argty:ty),* $(,)? ) $(-> $ret:ty)? ; )*
        }
    ) => {
        pub struct $Services {
            $( $(#[$meta])* pub $method: fn($($argty),*) $(-> $ret)?, )*
        }

        $crate::paste::paste! {
            static [<$mod_name:upper _SERVICE>]: $crate::service_cell::ServiceCell<$Services> =
                $crate::service_cell::ServiceCell::new();

            #[inline]
            pub fn [<$mod_name _services>]() -> &'static $Services {
                [<$mod_name:upper _SERVICE>].get()
            }

            #[inline]
            pub fn [<register_ $mod_name _services>](services: &'static $Services) {
                [<$mod_name:upper _SERVICE>].set(services);
            }

            $(
                $crate::__define_service_wrapper!(
                    $(@$attr)? [<$mod_name _services>], $method ( $($arg : $argty),* ) $(-> $ret)?
                );
            )*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __define_service_wrapper {
    (@no_wrapper $accessor:path, $method:ident ( $($arg:ident : $argty:ty),* ) $(-> $ret:ty)?) => {};
    ($accessor:path, $method:ident ( $($arg:ident : $argty:ty),* ) $(-> $ret:ty)?) => {
        #[inline(always)]
        pub fn $method ( $($arg : $argty),* ) $(-> $ret)? {
            ($accessor().$method)($($arg),*)
        }
    };
}
