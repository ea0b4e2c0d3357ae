//! Request handlers and route table

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use iploc_core::Location;
use iploc_index::{LookupEngine, LookupReport};
use tracing::{debug, error};

/// Address looked up for the info page
const SAMPLE_IP: &str = "77.22.56.119";
const MAX_CALLBACK_LEN: usize = 64;

/// Register every iploc route on an app
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/index.html", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/json/{ips}", web::get().to(json))
        .route("/{ips}", web::get().to(plain))
        .route("/{callback}/{ips}", web::get().to(jsonp));
}

/// Whether `name` can be used as a JSONP callback
///
/// Accepts a plain JavaScript identifier: ASCII letters, digits, `_` and `$`,
/// not starting with a digit.
pub fn is_valid_callback(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_CALLBACK_LEN
        && (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

async fn health() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("ok")
}

async fn index(engine: web::Data<LookupEngine>, req: HttpRequest) -> HttpResponse {
    let report = lookup(engine, &req, SAMPLE_IP.to_string()).await;
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(render_index(report.hits().next()))
}

async fn plain(
    engine: web::Data<LookupEngine>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let report = lookup(engine, &req, path.into_inner()).await;
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(report.to_plain())
}

async fn json(
    engine: web::Data<LookupEngine>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let report = lookup(engine, &req, path.into_inner()).await;
    HttpResponse::Ok()
        .content_type("text/json; charset=utf-8")
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .body(report.to_json())
}

async fn jsonp(
    engine: web::Data<LookupEngine>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
) -> HttpResponse {
    let (callback, ips) = path.into_inner();
    if !is_valid_callback(&callback) {
        debug!(callback = %callback, "Rejecting JSONP callback");
        return HttpResponse::BadRequest()
            .content_type("text/plain; charset=utf-8")
            .body("invalid callback name");
    }

    let report = lookup(engine, &req, ips).await;
    HttpResponse::Ok()
        .content_type("text/javascript; charset=utf-8")
        .body(report.to_jsonp(&callback))
}

/// Resolve a comma-separated list on the blocking pool
///
/// A failed or panicked lookup is logged and yields an empty report.
async fn lookup(engine: web::Data<LookupEngine>, req: &HttpRequest, ips: String) -> LookupReport {
    let list: Vec<String> = ips.split(',').map(str::to_string).collect();
    debug!(peer = ?req.peer_addr(), count = list.len(), "Lookup request");

    match web::block(move || engine.locate_many(list.as_slice())).await {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            error!(error = %err, "Lookup failed");
            LookupReport::default()
        }
        Err(err) => {
            error!(error = %err, "Lookup task aborted");
            LookupReport::default()
        }
    }
}

fn render_index(sample: Option<&Location>) -> String {
    let sample = match sample {
        Some(location) => format!(
            "<p><code>{ip}</code> &rarr; {city} <small>[{lat}, {lon}]</small></p>",
            ip = html_escape(&location.ip),
            city = html_escape(&location.city),
            lat = coordinate(location.coords.latitude),
            lon = coordinate(location.coords.longitude),
        ),
        None => format!(
            "<p><code>{}</code> &rarr; <em>not in the index</em></p>",
            SAMPLE_IP
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>iploc</title></head>
<body>
<h2>iploc: IPv4 city lookup</h2>
{sample}
<h3>API</h3>
<h4>text/plain</h4>
<p><code>/a.b.c.d[,a.b.c.d...]</code> &rarr; <code>a.b.c.d: City (CC-Region)</code></p>
<h4>text/json</h4>
<p><code>/json/a.b.c.d[,...]</code> &rarr; <code>{{"a.b.c.d":{{"city":"City (CC-Region)","geoLoc":[lat,lon]}}}}</code></p>
<h4>text/javascript (JSONP)</h4>
<p><code>/callback/a.b.c.d[,...]</code> &rarr; <code>callback({{...}})</code></p>
<hr>
<small>This product includes GeoLite2 data created by MaxMind, available from <a href="https://www.maxmind.com">https://www.maxmind.com</a></small>
</body>
</html>
"#
    )
}

fn coordinate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
