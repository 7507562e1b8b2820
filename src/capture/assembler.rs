// src/capture/assembler.rs
//! Archive assembly
//!
//! Projects accumulators into HAR entries. Assembly only reads the store and
//! never fails: malformed URLs or cookie headers degrade to empty lists, and
//! requests that are still in flight come out with zeroed response fields.
//!
//! Merge rules:
//! - Headers: inline headers first, then extra-info headers whose name is
//!   not already present (case-insensitive), in arrival order.
//! - Cookies: extra-info cookies when the event supplied any, otherwise
//!   parsed from the merged `Cookie` / `Set-Cookie` headers. An empty
//!   cookie list on an extra-info event counts as absent.
//! - POST data: fetched body, then the inline body, then a placeholder when
//!   the request had a body that was never captured.

use crate::capture::accumulator::Accumulator;
use crate::capture::events::{find_header, CookieRecord, Header, ResourceTiming};
use crate::capture::har::{
    HarCache, HarContent, HarCookie, HarEntry, HarHeader, HarPostData, HarQueryParam, HarRequest,
    HarResponse, HarTimings, BODY_UNAVAILABLE, UNMEASURED,
};
use crate::capture::store::AccumulatorStore;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::trace;
use url::Url;

const DEFAULT_HTTP_VERSION: &str = "HTTP/1.1";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Assembles one entry per accumulator, in first-creation order
pub fn assemble(store: &AccumulatorStore) -> Vec<HarEntry> {
    let mut entries = Vec::with_capacity(store.len());
    store.for_each(|acc| {
        if let Some(entry) = assemble_entry(acc) {
            entries.push(entry);
        }
    });
    entries
}

/// Projects a single accumulator; `None` if it carries no request at all
pub fn assemble_entry(acc: &Accumulator) -> Option<HarEntry> {
    if acc.request.url.is_empty() && acc.request.method.is_empty() {
        trace!("Skipping accumulator {} without a request", acc.request_id());
        return None;
    }

    let extra_request = acc.extra_request_info.as_ref();
    let extra_response = acc.extra_response_info.as_ref();
    let response = acc.response.as_ref();

    let request_headers = merge_headers(
        &acc.request.headers,
        extra_request.map(|i| i.headers.as_slice()).unwrap_or_default(),
    );
    let response_headers = merge_headers(
        response.map(|r| r.headers.as_slice()).unwrap_or_default(),
        extra_response.map(|i| i.headers.as_slice()).unwrap_or_default(),
    );

    // Empty association lists fall back to header parsing
    let request_cookies = match extra_request {
        Some(info) if !info.cookies.is_empty() => info
            .cookies
            .iter()
            .map(|c| HarCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                ..Default::default()
            })
            .collect(),
        _ => headers_named(&request_headers, "cookie")
            .flat_map(parse_cookie_header)
            .collect(),
    };

    let response_cookies = match extra_response {
        Some(info) if !info.cookies.is_empty() => info.cookies.iter().map(cookie_from_record).collect(),
        _ => headers_named(&response_headers, "set-cookie")
            .flat_map(|value| value.lines())
            .filter_map(parse_set_cookie)
            .collect(),
    };

    let (post_data, request_body_size) = build_post_data(acc, &request_headers);

    let http_version = response
        .and_then(|r| r.protocol.clone())
        .unwrap_or_else(|| DEFAULT_HTTP_VERSION.to_string());

    let encoded_size = acc.encoded_data_length.map(|n| n as i64).unwrap_or(0);
    let body = acc.response_body();

    let content = HarContent {
        size: encoded_size,
        mime_type: response
            .map(|r| r.mime_type.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        text: body.map(|b| b.text.clone()).unwrap_or_default(),
        encoding: body
            .filter(|b| b.base64_encoded)
            .map(|_| "base64".to_string()),
        compression: har_find(&response_headers, "content-encoding").map(str::to_string),
    };

    let redirect_url = response
        .and_then(|r| r.redirect_url.clone())
        .or_else(|| har_find(&response_headers, "location").map(str::to_string))
        .unwrap_or_default();

    let timings = compute_timings(acc);

    Some(HarEntry {
        started_date_time: format_wall_time(acc.wall_time),
        time: elapsed_ms(acc.start_timestamp, acc.finished_timestamp),
        request: HarRequest {
            method: if acc.request.method.is_empty() {
                "GET".to_string()
            } else {
                acc.request.method.clone()
            },
            url: acc.request.url.clone(),
            http_version: http_version.clone(),
            cookies: request_cookies,
            headers: request_headers,
            query_string: parse_query_string(&acc.request.url),
            post_data,
            headers_size: -1,
            body_size: request_body_size,
        },
        response: HarResponse {
            status: response.map(|r| r.status).unwrap_or(0),
            status_text: response.map(|r| r.status_text.clone()).unwrap_or_default(),
            http_version,
            cookies: response_cookies,
            headers: response_headers,
            content,
            redirect_url,
            headers_size: -1,
            body_size: encoded_size,
        },
        cache: if acc.served_from_cache {
            HarCache::served_from_cache()
        } else {
            HarCache::default()
        },
        timings,
        server_ip_address: response
            .and_then(|r| r.remote_ip_address.clone())
            .unwrap_or_default(),
        request_id: acc.request_id().to_string(),
        initiator: acc.initiator.clone(),
        priority: acc.request.initial_priority.clone(),
        resource_type: acc.resource_type.clone(),
        error: acc.failure.as_ref().map(|f| f.error_text.clone()),
        canceled: acc.failure.as_ref().map(|f| f.canceled),
    })
}

/// Inline headers followed by extra-info headers not already present
pub fn merge_headers(inline: &[Header], extra: &[Header]) -> Vec<HarHeader> {
    let mut merged: Vec<HarHeader> = inline
        .iter()
        .map(|h| HarHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect();

    for header in extra {
        if !merged.iter().any(|m| m.name.eq_ignore_ascii_case(&header.name)) {
            merged.push(HarHeader {
                name: header.name.clone(),
                value: header.value.clone(),
            });
        }
    }
    merged
}

fn har_find<'a>(headers: &'a [HarHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn headers_named<'a>(headers: &'a [HarHeader], name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Parses a request `Cookie` header into name/value cookies
pub fn parse_cookie_header(value: &str) -> Vec<HarCookie> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = split_pair(pair);
            (!name.is_empty()).then(|| HarCookie {
                name: name.to_string(),
                value: value.to_string(),
                ..Default::default()
            })
        })
        .collect()
}

/// Parses one `Set-Cookie` value. A leading `Set-Cookie:` is tolerated.
/// Returns `None` when the cookie has no name.
pub fn parse_set_cookie(line: &str) -> Option<HarCookie> {
    let line = line.trim();
    let line = match line.get(..11) {
        Some(prefix) if prefix.eq_ignore_ascii_case("set-cookie:") => &line[11..],
        _ => line,
    };

    let mut segments = line.split(';');
    let (name, value) = split_pair(segments.next()?);
    if name.is_empty() {
        return None;
    }

    let mut cookie = HarCookie {
        name: name.to_string(),
        value: value.to_string(),
        http_only: Some(false),
        secure: Some(false),
        ..Default::default()
    };

    for segment in segments {
        let (attr, attr_value) = split_pair(segment);
        match attr.to_ascii_lowercase().as_str() {
            "path" => cookie.path = Some(attr_value.to_string()),
            "domain" => cookie.domain = Some(attr_value.to_string()),
            "expires" => cookie.expires = Some(attr_value.to_string()),
            "httponly" => cookie.http_only = Some(true),
            "secure" => cookie.secure = Some(true),
            "samesite" => cookie.same_site = Some(attr_value.to_string()),
            _ => {}
        }
    }

    Some(cookie)
}

fn split_pair(segment: &str) -> (&str, &str) {
    let segment = segment.trim();
    match segment.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (segment, ""),
    }
}

fn cookie_from_record(record: &CookieRecord) -> HarCookie {
    HarCookie {
        name: record.name.clone(),
        value: record.value.clone(),
        path: Some(record.path.clone()).filter(|p| !p.is_empty()),
        domain: Some(record.domain.clone()).filter(|d| !d.is_empty()),
        expires: record
            .expires
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64))
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        http_only: Some(record.http_only),
        secure: Some(record.secure),
        same_site: record.same_site.clone(),
    }
}

/// Decodes the query component of `url`; malformed URLs yield an empty list
pub fn parse_query_string(url: &str) -> Vec<HarQueryParam> {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .map(|(name, value)| HarQueryParam {
                name: name.into_owned(),
                value: value.into_owned(),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn build_post_data(acc: &Accumulator, request_headers: &[HarHeader]) -> (Option<HarPostData>, i64) {
    let content_type = har_find(request_headers, "content-type")
        .or_else(|| find_header(&acc.request.headers, "content-type"));

    if let Some(text) = acc.request_post_data() {
        let mime_type = content_type.unwrap_or_default().to_string();
        let params = if mime_type.to_ascii_lowercase().contains(FORM_URLENCODED) {
            url::form_urlencoded::parse(text.as_bytes())
                .map(|(name, value)| HarQueryParam {
                    name: name.into_owned(),
                    value: value.into_owned(),
                })
                .collect()
        } else {
            Vec::new()
        };
        let size = text.len() as i64;
        return (
            Some(HarPostData {
                mime_type,
                text: text.to_string(),
                params,
            }),
            size,
        );
    }

    let mime_type = content_type.unwrap_or(DEFAULT_MIME_TYPE).to_string();

    if let Some(text) = acc.request.post_data.as_deref().filter(|t| !t.is_empty()) {
        return (
            Some(HarPostData {
                mime_type,
                text: text.to_string(),
                params: Vec::new(),
            }),
            text.len() as i64,
        );
    }

    if acc.request.has_post_data {
        return (
            Some(HarPostData {
                mime_type,
                text: BODY_UNAVAILABLE.to_string(),
                params: Vec::new(),
            }),
            0,
        );
    }

    (None, 0)
}

/// Milliseconds between two monotonic timestamps in seconds
fn elapsed_ms(from: Option<f64>, to: Option<f64>) -> f64 {
    match (from, to) {
        (Some(from), Some(to)) if to >= from => (to - from) * 1000.0,
        _ => UNMEASURED,
    }
}

fn phase_ms(start: f64, end: f64) -> f64 {
    if start >= 0.0 && end >= start {
        end - start
    } else {
        UNMEASURED
    }
}

fn compute_timings(acc: &Accumulator) -> HarTimings {
    let resource = acc.response.as_ref().and_then(|r| r.timing.as_ref());

    let (blocked, dns, connect, ssl, send) = match resource {
        Some(t) => resource_phases(t),
        None => (UNMEASURED, UNMEASURED, UNMEASURED, UNMEASURED, 0.0),
    };

    HarTimings {
        blocked,
        dns,
        connect,
        send,
        wait: elapsed_ms(acc.start_timestamp, acc.response_timestamp),
        receive: elapsed_ms(acc.response_timestamp, acc.finished_timestamp),
        ssl,
    }
}

fn resource_phases(t: &ResourceTiming) -> (f64, f64, f64, f64, f64) {
    let blocked = [t.dns_start, t.connect_start, t.send_start]
        .into_iter()
        .find(|offset| *offset >= 0.0)
        .unwrap_or(UNMEASURED);
    let send = match phase_ms(t.send_start, t.send_end) {
        s if s >= 0.0 => s,
        _ => 0.0,
    };
    (
        blocked,
        phase_ms(t.dns_start, t.dns_end),
        phase_ms(t.connect_start, t.connect_end),
        phase_ms(t.ssl_start, t.ssl_end),
        send,
    )
}

fn format_wall_time(wall_time: f64) -> String {
    DateTime::<Utc>::from_timestamp_millis((wall_time * 1000.0).round() as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::accumulator::ResponseBody;
    use crate::capture::events::{ExtraInfo, RequestStarted, ResponseDescriptor};

    fn accumulator(method: &str, url: &str) -> Accumulator {
        Accumulator::new(
            "1".to_string(),
            0,
            RequestStarted::new(method, url).with_wall_time(1_700_000_000.5),
            Some(100.0),
        )
    }

    #[test]
    fn test_merge_headers_dedupes_case_insensitively() {
        let merged = merge_headers(
            &[Header::new("A", "1")],
            &[Header::new("a", "2"), Header::new("B", "3")],
        );
        assert_eq!(
            merged,
            vec![
                HarHeader { name: "A".to_string(), value: "1".to_string() },
                HarHeader { name: "B".to_string(), value: "3".to_string() },
            ]
        );
    }

    #[test]
    fn test_parse_set_cookie() {
        let cookie = parse_set_cookie("Set-Cookie: sid=abc; Path=/; HttpOnly; Secure").unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.http_only, Some(true));
        assert_eq!(cookie.secure, Some(true));

        let cookie = parse_set_cookie("token=a=b; Domain=.x.com; expires=Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(cookie.value, "a=b");
        assert_eq!(cookie.domain.as_deref(), Some(".x.com"));
        assert_eq!(cookie.expires.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(cookie.http_only, Some(false));

        assert!(parse_set_cookie("=orphan; Path=/").is_none());
        assert!(parse_set_cookie("").is_none());
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("a=1; b=two=2;; c");
        let pairs: Vec<_> = cookies.iter().map(|c| (c.name.as_str(), c.value.as_str())).collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "two=2"), ("c", "")]);
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("https://x/y?a=1&b=2");
        assert_eq!(
            params,
            vec![
                HarQueryParam { name: "a".to_string(), value: "1".to_string() },
                HarQueryParam { name: "b".to_string(), value: "2".to_string() },
            ]
        );
        assert!(parse_query_string("not-a-url").is_empty());
        assert_eq!(parse_query_string("https://x/?q=a+b%21")[0].value, "a b!");
    }

    #[test]
    fn test_pending_request_has_zeroed_response() {
        let entry = assemble_entry(&accumulator("GET", "https://x/?a=1")).unwrap();
        assert_eq!(entry.response.status, 0);
        assert_eq!(entry.response.content.text, "");
        assert_eq!(entry.response.content.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(entry.request.http_version, DEFAULT_HTTP_VERSION);
        assert_eq!(entry.time, UNMEASURED);
        assert_eq!(entry.timings.wait, UNMEASURED);
        assert_eq!(entry.started_date_time, "2023-11-14T22:13:20.500Z");
        assert_eq!(entry.request.query_string.len(), 1);
        assert!(entry.request.post_data.is_none());
    }

    #[test]
    fn test_timings_and_encoding() {
        let mut acc = accumulator("GET", "https://x/");
        acc.record_response(
            ResponseDescriptor::new(200, "OK").with_headers(vec![
                Header::new("Content-Encoding", "gzip"),
                Header::new("Set-Cookie", "a=1; Path=/\nb=2; Secure"),
            ]),
            Some(100.25),
        )
        .unwrap();
        acc.finish(2048, Some(100.5)).unwrap();
        acc.set_response_body(ResponseBody {
            text: "aGVsbG8=".to_string(),
            base64_encoded: true,
        });

        let entry = assemble_entry(&acc).unwrap();
        assert_eq!(entry.time, 500.0);
        assert_eq!(entry.timings.wait, 250.0);
        assert_eq!(entry.timings.receive, 250.0);
        assert_eq!(entry.timings.dns, UNMEASURED);
        assert_eq!(entry.timings.send, 0.0);
        assert_eq!(entry.response.content.size, 2048);
        assert_eq!(entry.response.content.encoding.as_deref(), Some("base64"));
        assert_eq!(entry.response.content.compression.as_deref(), Some("gzip"));

        let names: Vec<_> = entry.response.cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_resource_timing_phases() {
        let mut acc = accumulator("GET", "https://x/");
        let mut response = ResponseDescriptor::new(200, "OK");
        response.timing = Some(ResourceTiming {
            dns_start: 1.0,
            dns_end: 5.0,
            connect_start: 5.0,
            connect_end: 20.0,
            ssl_start: 10.0,
            ssl_end: 20.0,
            send_start: 21.0,
            send_end: 21.5,
            ..Default::default()
        });
        acc.record_response(response, Some(100.1)).unwrap();

        let timings = assemble_entry(&acc).unwrap().timings;
        assert_eq!(timings.blocked, 1.0);
        assert_eq!(timings.dns, 4.0);
        assert_eq!(timings.connect, 15.0);
        assert_eq!(timings.ssl, 10.0);
        assert_eq!(timings.send, 0.5);
        assert_eq!(timings.receive, UNMEASURED);
    }

    #[test]
    fn test_extra_info_cookies_take_precedence() {
        let mut acc = accumulator("GET", "https://x/");
        acc.request.headers = vec![Header::new("Cookie", "from_header=1")];
        acc.merge_extra_request_info(ExtraInfo::new(
            vec![Header::new("cookie", "ignored=1"), Header::new("X-Extra", "y")],
            vec![CookieRecord::new("from_extra", "2")],
        ));

        let entry = assemble_entry(&acc).unwrap();
        assert_eq!(entry.request.cookies.len(), 1);
        assert_eq!(entry.request.cookies[0].name, "from_extra");
        assert_eq!(entry.request.headers.len(), 2);
        assert_eq!(entry.request.headers[1].name, "X-Extra");
    }

    #[test]
    fn test_response_extra_info_cookies_and_headers() {
        let mut acc = accumulator("GET", "https://x/login");
        acc.record_response(
            ResponseDescriptor::new(200, "OK").with_headers(vec![
                Header::new("X-Raw", "inline"),
                Header::new("Set-Cookie", "from_header=1; Path=/"),
            ]),
            Some(100.1),
        )
        .unwrap();

        let mut persistent = CookieRecord::new("sid", "abc");
        persistent.domain = "x".to_string();
        persistent.path = "/".to_string();
        persistent.expires = Some(1_700_000_000.0);
        persistent.http_only = true;
        let mut session_cookie = CookieRecord::new("tmp", "1");
        session_cookie.expires = Some(-1.0);
        session_cookie.secure = true;

        acc.merge_extra_response_info(ExtraInfo::new(
            vec![
                Header::new("x-raw", "from-extra"),
                Header::new("set-cookie", "from_header=1; Path=/"),
            ],
            vec![persistent, session_cookie],
        ));

        let response = assemble_entry(&acc).unwrap().response;
        let headers: Vec<_> = response
            .headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
            .collect();
        assert_eq!(
            headers,
            vec![("X-Raw", "inline"), ("Set-Cookie", "from_header=1; Path=/")]
        );

        assert_eq!(response.cookies.len(), 2);
        let sid = &response.cookies[0];
        assert_eq!(sid.name, "sid");
        assert_eq!(sid.domain.as_deref(), Some("x"));
        assert_eq!(sid.path.as_deref(), Some("/"));
        assert_eq!(sid.expires.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert_eq!(sid.http_only, Some(true));
        assert_eq!(sid.secure, Some(false));

        let tmp = &response.cookies[1];
        assert_eq!(tmp.name, "tmp");
        assert!(tmp.expires.is_none());
        assert!(tmp.path.is_none());
        assert!(tmp.domain.is_none());
        assert_eq!(tmp.secure, Some(true));
    }

    #[test]
    fn test_empty_extra_cookie_list_falls_back_to_headers() {
        let mut acc = accumulator("GET", "https://x/");
        acc.record_response(
            ResponseDescriptor::new(200, "OK")
                .with_headers(vec![Header::new("Set-Cookie", "a=1; HttpOnly")]),
            None,
        )
        .unwrap();
        acc.merge_extra_response_info(ExtraInfo::default());

        let cookies = assemble_entry(&acc).unwrap().response.cookies;
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "a");
        assert_eq!(cookies[0].http_only, Some(true));
    }

    #[test]
    fn test_cookie_header_from_extra_info_is_parsed() {
        let mut acc = accumulator("GET", "https://x/");
        acc.merge_extra_request_info(ExtraInfo::new(
            vec![Header::new("Cookie", "sid=abc; theme=dark")],
            vec![],
        ));

        let cookies = assemble_entry(&acc).unwrap().request.cookies;
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[1].value, "dark");
    }

    #[test]
    fn test_post_data_precedence() {
        let mut acc = accumulator("POST", "https://x/form");
        acc.request.headers = vec![Header::new(
            "Content-Type",
            "application/x-www-form-urlencoded; charset=UTF-8",
        )];
        acc.request.post_data = Some("inline=1".to_string());
        acc.request.has_post_data = true;

        let post = assemble_entry(&acc).unwrap().request.post_data.unwrap();
        assert_eq!(post.text, "inline=1");
        assert!(post.params.is_empty());

        acc.set_request_post_data("a=1&b=hello+world".to_string());
        let entry = assemble_entry(&acc).unwrap();
        let post = entry.request.post_data.unwrap();
        assert_eq!(post.text, "a=1&b=hello+world");
        assert_eq!(post.params.len(), 2);
        assert_eq!(post.params[1].value, "hello world");
        assert_eq!(entry.request.body_size, 17);
    }

    #[test]
    fn test_uncaptured_body_is_marked() {
        let mut acc = accumulator("POST", "https://x/upload");
        acc.request.has_post_data = true;

        let entry = assemble_entry(&acc).unwrap();
        let post = entry.request.post_data.unwrap();
        assert_eq!(post.text, BODY_UNAVAILABLE);
        assert_eq!(post.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(entry.request.body_size, 0);
    }

    #[test]
    fn test_failure_and_cache_fields() {
        let mut acc = accumulator("GET", "https://x/");
        acc.mark_served_from_cache().unwrap();
        acc.fail("net::ERR_ABORTED".to_string(), true).unwrap();

        let entry = assemble_entry(&acc).unwrap();
        assert_eq!(entry.error.as_deref(), Some("net::ERR_ABORTED"));
        assert_eq!(entry.canceled, Some(true));
        assert_eq!(entry.cache, HarCache::served_from_cache());
        assert_eq!(entry.response.status, 0);
    }

    #[test]
    fn test_redirect_url_from_location() {
        let mut acc = accumulator("GET", "https://x/old");
        acc.record_response(
            ResponseDescriptor::new(301, "Moved Permanently")
                .with_headers(vec![Header::new("location", "https://x/new")]),
            None,
        )
        .unwrap();

        assert_eq!(assemble_entry(&acc).unwrap().response.redirect_url, "https://x/new");
    }
}
