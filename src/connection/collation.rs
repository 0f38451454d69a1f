use std::cmp::Ordering;
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;

use libsqlite3_sys::{sqlite3_create_collation_v2, SQLITE_OK, SQLITE_UTF8};

use crate::connection::Connection;
use crate::error::{Error, Result};

unsafe extern "C" fn free_boxed_value<T>(p: *mut c_void) {
    drop(Box::from_raw(p as *mut T));
}

impl Connection {
    /// Registers a collation under `name`, replacing any previous collation
    /// with that name.
    pub fn add_collation<F>(&mut self, name: &str, collation: F) -> Result<()>
    where
        F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
    {
        unsafe extern "C" fn call_boxed_closure<C>(
            arg1: *mut c_void,
            arg2: c_int,
            arg3: *const c_void,
            arg4: c_int,
            arg5: *const c_void,
        ) -> c_int
        where
            C: Fn(&str, &str) -> Ordering,
        {
            let r = catch_unwind(AssertUnwindSafe(|| {
                let boxed_f: *mut C = arg1 as *mut C;
                debug_assert!(!boxed_f.is_null());
                let s1 = {
                    let c_slice = slice::from_raw_parts(arg3 as *const u8, arg2 as usize);
                    String::from_utf8_lossy(c_slice)
                };
                let s2 = {
                    let c_slice = slice::from_raw_parts(arg5 as *const u8, arg4 as usize);
                    String::from_utf8_lossy(c_slice)
                };
                (*boxed_f)(s1.as_ref(), s2.as_ref())
            }));

            match r {
                Err(_) => -1,
                Ok(Ordering::Less) => -1,
                Ok(Ordering::Equal) => 0,
                Ok(Ordering::Greater) => 1,
            }
        }

        self.assert_owner();

        let boxed_f: *mut F = Box::into_raw(Box::new(collation));
        let c_name = collation_name(name)?;
        let status = unsafe {
            sqlite3_create_collation_v2(
                self.handle.as_ptr(),
                c_name.as_ptr(),
                SQLITE_UTF8,
                boxed_f as *mut c_void,
                Some(call_boxed_closure::<F>),
                Some(free_boxed_value::<F>),
            )
        };

        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }

        self.collations.insert(name.to_owned());
        Ok(())
    }

    /// Removes the collation registered under `name`. Statements that still
    /// reference it fail to compile afterwards. A no-op when nothing is
    /// registered under that name.
    pub fn remove_collation(&mut self, name: &str) -> Result<()> {
        self.assert_owner();

        if !self.collations.remove(name) {
            return Ok(());
        }

        let c_name = collation_name(name)?;
        let status = unsafe {
            sqlite3_create_collation_v2(
                self.handle.as_ptr(),
                c_name.as_ptr(),
                SQLITE_UTF8,
                std::ptr::null_mut(),
                None,
                None,
            )
        };
        if status != SQLITE_OK {
            return Err(self.handle.last_error().into());
        }
        Ok(())
    }
}

fn collation_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| Error::InvalidConfiguration(format!("invalid collation name: {name}")))
}

/// The default case-insensitive Unicode collation, registered at setup as
/// `UNICODE_CI`. `BINARY` and ASCII-only `NOCASE` are engine built-ins.
pub(crate) fn unicode_ci(left: &str, right: &str) -> Ordering {
    left.to_lowercase().cmp(&right.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::unicode_ci;
    use std::cmp::Ordering;

    #[test]
    fn unicode_ci_folds_beyond_ascii() {
        assert_eq!(unicode_ci("STRASSE", "strasse"), Ordering::Equal);
        assert_eq!(unicode_ci("Élan", "éLAN"), Ordering::Equal);
        assert_eq!(unicode_ci("a", "b"), Ordering::Less);
    }
}
