//! Sample pages and requests for scrape tests

use std::collections::HashMap;

/// A job board listing page with two postings.
pub const JOB_BOARD_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Careers at Acme</title></head>
  <body>
    <ul class="postings">
      <li class="posting">
        <h2 class="role">Backend Engineer</h2>
        <span class="location">Berlin</span>
      </li>
      <li class="posting">
        <h2 class="role">Data Engineer</h2>
        <span class="location">Remote</span>
      </li>
    </ul>
  </body>
</html>"#;

/// Selectors matching `JOB_BOARD_PAGE`, plus one key that matches nothing.
pub fn job_board_selectors() -> HashMap<String, String> {
    HashMap::from([
        ("roles".to_string(), "h2.role".to_string()),
        ("locations".to_string(), ".posting .location".to_string()),
        ("salary".to_string(), ".salary".to_string()),
    ])
}
