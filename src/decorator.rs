//! Request decoration strategies for upload requests.
//!
//! The compression service throttles anonymous clients. Decorators add
//! headers that make each upload look like it comes from a different browser.
//! None of this is needed for correctness.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.116 Safari/537.36";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Adds headers to every upload request.
pub trait RequestDecorator: Send + Sync {
  fn decorate(&self, headers: &mut HeaderMap);
}

/// Leaves requests untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecoration;

impl RequestDecorator for NoDecoration {
  fn decorate(&self, _headers: &mut HeaderMap) {}
}

/// Fixed browser user agent plus a random forwarded-for address per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserDisguise;

impl RequestDecorator for BrowserDisguise {
  fn decorate(&self, headers: &mut HeaderMap) {
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    if let Ok(value) = HeaderValue::from_str(&random_forwarded_ip(&mut rand::rng())) {
      headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
  }
}

/// Four dot-separated octets, each in `0..=254`.
pub fn random_forwarded_ip<G: Rng + ?Sized>(rng: &mut G) -> String {
  let octets: [u8; 4] = std::array::from_fn(|_| rng.random_range(0..255));
  format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}
