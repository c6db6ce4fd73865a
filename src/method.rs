//! Method masks: the bitset a [`crate::route::Route`] uses to decide which
//! request methods it accepts.

use axum::http::Method as HttpMethod;

bitflags::bitflags! {
    /// Bitset over the thirteen methods spec.md §3 names, plus the `ANY`
    /// sentinel. `ANY` is a distinct bit rather than the union of the
    /// others: a route whose mask is the union of every named method still
    /// gets the `OPTIONS`-intercepted treatment, while a route whose mask
    /// literally carries `ANY` does not (spec.md §4.3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MethodMask: u16 {
        const GET     = 1 << 0;
        const POST    = 1 << 1;
        const PUT     = 1 << 2;
        const PATCH   = 1 << 3;
        const DELETE  = 1 << 4;
        const COPY    = 1 << 5;
        const HEAD    = 1 << 6;
        const OPTIONS = 1 << 7;
        const LINK    = 1 << 8;
        const UNLINK  = 1 << 9;
        const VIEW    = 1 << 10;
        const TRACE   = 1 << 11;
        const ANY     = 1 << 12;
    }
}

impl MethodMask {
    /// True if two masks would ever both accept the same concrete request,
    /// i.e. either is `ANY` or their explicit method bits intersect.
    pub fn overlaps(self, other: MethodMask) -> bool {
        if self.contains(MethodMask::ANY) || other.contains(MethodMask::ANY) {
            return true;
        }
        !(self & other).is_empty()
    }

    /// Maps an inbound HTTP method onto its mask bit. `COPY`/`LINK`/
    /// `UNLINK`/`VIEW` are non-standard WebDAV-era verbs not modeled by
    /// [`axum::http::Method`]'s constants, so they're matched on their
    /// wire name.
    pub fn from_http_method(method: &HttpMethod) -> Option<MethodMask> {
        Some(match method.as_str() {
            "GET" => MethodMask::GET,
            "POST" => MethodMask::POST,
            "PUT" => MethodMask::PUT,
            "PATCH" => MethodMask::PATCH,
            "DELETE" => MethodMask::DELETE,
            "COPY" => MethodMask::COPY,
            "HEAD" => MethodMask::HEAD,
            "OPTIONS" => MethodMask::OPTIONS,
            "LINK" => MethodMask::LINK,
            "UNLINK" => MethodMask::UNLINK,
            "VIEW" => MethodMask::VIEW,
            "TRACE" => MethodMask::TRACE,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_overlaps_everything() {
        assert!(MethodMask::ANY.overlaps(MethodMask::GET));
        assert!(MethodMask::POST.overlaps(MethodMask::ANY));
    }

    #[test]
    fn disjoint_masks_do_not_overlap() {
        assert!(!MethodMask::GET.overlaps(MethodMask::POST));
    }

    #[test]
    fn union_of_all_methods_is_not_any() {
        let all_named = MethodMask::GET
            | MethodMask::POST
            | MethodMask::PUT
            | MethodMask::PATCH
            | MethodMask::DELETE
            | MethodMask::COPY
            | MethodMask::HEAD
            | MethodMask::OPTIONS
            | MethodMask::LINK
            | MethodMask::UNLINK
            | MethodMask::VIEW
            | MethodMask::TRACE;
        assert!(!all_named.contains(MethodMask::ANY));
    }

    #[test]
    fn from_http_method_recognizes_webdav_style_verbs() {
        assert_eq!(
            MethodMask::from_http_method(&HttpMethod::from_bytes(b"VIEW").unwrap()),
            Some(MethodMask::VIEW)
        );
        assert_eq!(MethodMask::from_http_method(&HttpMethod::GET), Some(MethodMask::GET));
    }
}
