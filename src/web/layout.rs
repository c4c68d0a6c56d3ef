pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// RFC3339 时间戳转页面显示格式；解析失败原样返回
pub fn format_datetime(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}

pub fn site_nav(title: &str) -> String {
    format!(
        r#"<nav style="background:#1a1a2e;padding:12px 24px;display:flex;gap:24px;align-items:center;">
        <a href="/" style="color:#e0e0e0;text-decoration:none;font-weight:bold;">{}</a>
    </nav>"#,
        html_escape(title)
    )
}

pub fn base_style() -> &'static str {
    r#"<style>
        * { margin:0; padding:0; box-sizing:border-box; }
        body { font-family:system-ui,-apple-system,sans-serif; background:#f5f5f5; color:#333; }
        .container { max-width:1000px; margin:24px auto; padding:0 16px; }
        h1 { margin-bottom:16px; }
        h2 { margin-top:24px; margin-bottom:12px; }
        table { width:100%; border-collapse:collapse; background:#fff; border-radius:4px; overflow:hidden; box-shadow:0 1px 3px rgba(0,0,0,0.1); }
        th,td { padding:10px 14px; text-align:left; border-bottom:1px solid #eee; }
        th { background:#f8f8f8; font-weight:600; }
        a { color:#4a6cf7; text-decoration:none; }
        a:hover { text-decoration:underline; }
        .btn { display:inline-block; padding:6px 14px; border-radius:4px; border:none; cursor:pointer; font-size:14px; text-decoration:none; }
        .btn-primary { background:#4a6cf7; color:#fff; }
        .btn-success { background:#27ae60; color:#fff; }
        .btn-success.is-disabled { background:#ccc; pointer-events:none; }
        label { display:block; margin-bottom:4px; font-weight:500; }
        input[type=text] {
            width:100%; padding:8px 10px; border:1px solid #ccc; border-radius:4px; font-size:14px; margin-bottom:12px;
        }
        .alert { padding:8px 12px; border-radius:4px; margin-bottom:8px; background:#fff; border-left:4px solid #ccc; }
        .alert pre { margin-top:6px; padding:8px; background:#f8f8f8; overflow-x:auto; font-size:13px; }
        .is-danger { border-left-color:#e74c3c; background:#fdecea; }
        .is-warning { border-left-color:#f39c12; background:#fef5e7; }
        .is-info { border-left-color:#4a6cf7; background:#edf1fe; }
        .is-success { border-left-color:#27ae60; background:#e9f7ef; }
        .is-light { border-left-color:#ddd; color:#777; }
        .status-badge { padding:2px 8px; border-radius:10px; font-size:12px; }
        .status-success { background:#a8e6cf; color:#1b5e20; }
        .status-failed { background:#ffcdd2; color:#b71c1c; }
    </style>"#
}

pub fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>{title}</title>{base_style}</head>
        <body>{nav}<div class="container">{body}</div></body></html>"#,
        title = html_escape(title),
        base_style = base_style(),
        nav = site_nav("sitecast"),
        body = body,
    )
}

pub fn page_with_script(title: &str, body: &str, script: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>{title}</title>{base_style}</head>
        <body>{nav}<div class="container">{body}</div><script>{script}</script></body></html>"#,
        title = html_escape(title),
        base_style = base_style(),
        nav = site_nav("sitecast"),
        body = body,
        script = script,
    )
}
