use axum::Form;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::builder::is_valid_source_url;
use crate::state::AppState;
use crate::web::layout::{format_datetime, html_escape, page, page_with_script};

pub async fn home_page(State(state): State<AppState>) -> Html<String> {
    let body = format!(
        r#"<h1>{title}</h1>
        <p>提交一个静态站点仓库，按需构建并在线预览。</p>
        <form method="POST" action="/site">
            <label for="url">仓库地址</label>
            <input type="text" id="url" name="url" placeholder="https://example.com/user/repo.git" required>
            <button type="submit" class="btn btn-primary">注册站点</button>
        </form>"#,
        title = html_escape(&state.config.site.title),
    );
    Html(page(&state.config.site.title, &body))
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub url: String,
}

/// 注册（或复用）站点映射后跳转到站点页
pub async fn register_site(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Response {
    let url = form.url.trim();
    if !is_valid_source_url(url) {
        let body = format!(
            r#"<h1>注册失败</h1><p>无法识别的仓库地址：{}</p><p><a href="/">返回</a></p>"#,
            html_escape(url)
        );
        return (StatusCode::UNPROCESSABLE_ENTITY, Html(page("注册失败", &body))).into_response();
    }

    match state.mappings.register(url).await {
        Ok(mapping) => Redirect::to(&format!("/site/{}/", mapping.key)).into_response(),
        Err(e) => {
            tracing::error!("注册站点映射失败：{e:#}");
            let body = r#"<h1>注册失败</h1><p>服务内部错误，请稍后重试。</p>"#;
            (StatusCode::INTERNAL_SERVER_ERROR, Html(page("注册失败", body))).into_response()
        }
    }
}

pub async fn site_page(Path(key): Path<String>, State(state): State<AppState>) -> Response {
    let mapping = match state.mappings.resolve(&key).await {
        Ok(Some(mapping)) => mapping,
        Ok(None) => {
            let body = r#"<h1>站点不存在</h1><p>这个 key 没有对应的站点映射。<a href="/">返回</a></p>"#;
            return (StatusCode::NOT_FOUND, Html(page("站点不存在", body))).into_response();
        }
        Err(e) => {
            tracing::error!("查询站点映射失败：{e:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let rows = state.history.recent_for_site(&key, 20).await;
    let mut table_rows = String::new();
    for row in &rows {
        let badge = match row.status.as_str() {
            "success" => r#"<span class="status-badge status-success">成功</span>"#,
            _ => r#"<span class="status-badge status-failed">失败</span>"#,
        };
        let duration = row
            .duration_ms
            .map(|d| format!("{d}ms"))
            .unwrap_or_else(|| "-".to_string());
        let error_html = row
            .error
            .as_deref()
            .map(|e| {
                format!(
                    r#"<span title="{}">{}</span>"#,
                    html_escape(e),
                    html_escape(&e.chars().take(80).collect::<String>())
                )
            })
            .unwrap_or_default();

        table_rows.push_str(&format!(
            r#"<tr>
                <td>{started_at}</td>
                <td>{branch}</td>
                <td>{badge}</td>
                <td>{duration}</td>
                <td>{finished_at}</td>
                <td>{error_html}</td>
            </tr>"#,
            started_at = format_datetime(&row.started_at),
            branch = html_escape(&row.branch),
            badge = badge,
            duration = duration,
            finished_at = format_datetime(&row.finished_at),
            error_html = error_html,
        ));
    }

    let body = format!(
        r##"<h1>站点 {key}</h1>
        <p>源仓库：{url}</p>
        <label for="branch">分支</label>
        <input type="text" id="branch" value="main">
        <p>
            <button type="button" id="build-action" class="btn btn-primary">构建</button>
            <a id="launch-link" class="btn btn-success is-disabled" href="#" target="{frame}">打开站点</a>
        </p>
        <h2>构建状态</h2>
        <div id="build-status"></div>
        <h2>构建历史</h2>
        <table>
            <thead><tr><th>开始时间</th><th>分支</th><th>状态</th><th>耗时</th><th>完成时间</th><th>错误</th></tr></thead>
            <tbody>{table_rows}</tbody>
        </table>"##,
        key = html_escape(&key),
        url = html_escape(&mapping.url),
        frame = html_escape(&state.config.site.frame),
        table_rows = table_rows,
    );

    // 消费构建事件流的页面脚本：按 level 着色、渲染结构化 Problem、
    // 区分优雅关闭与异常断连（断连时浏览器带 Last-Event-ID 自动重连）
    let script = r#"
        (function() {
            var statusEl = document.getElementById('build-status');
            var branchEl = document.getElementById('branch');
            var launchEl = document.getElementById('launch-link');
            var source = null;
            var graceful = false;

            function clearStatus() { statusEl.innerHTML = ''; }
            function escHtml(s) {
                var d = document.createElement('div');
                d.textContent = s == null ? '' : s;
                return d.innerHTML;
            }
            function levelClass(level) {
                if (level == null) level = 'debug';
                switch (level) {
                    case 'error': return 'is-danger';
                    case 'warn': return 'is-warning';
                    case 'info': return 'is-info';
                    case 'debug': return 'is-light';
                    default: return level;
                }
            }
            function langFromPath(path) {
                if (path.endsWith('.css') || path.endsWith('.scss')) return 'css';
                if (path.endsWith('.js')) return 'javascript';
                return 'html';
            }
            function problemHtml(value) {
                if (typeof value === 'string') return escHtml(value);
                if (value !== Object(value)) return escHtml('' + value);
                var out = '';
                if (value.path) {
                    out += escHtml(value.path) + '<br>';
                }
                out += escHtml(value.message);
                if (value.source) {
                    var lines = '';
                    var offset = '';
                    if (value.beginLine) {
                        lines = value.beginLine == value.endLine
                            ? value.beginLine
                            : value.beginLine + '-' + value.endLine;
                        offset = value.offset;
                    }
                    var lang = langFromPath(value.path || '');
                    out += '<pre data-line="' + lines + '" data-line-offset="' + offset + '">';
                    out += '<code class="language-' + lang + '">' + escHtml(value.source) + '</code></pre>';
                }
                return out;
            }
            function addStatus(html, cls) {
                var node = document.createElement('div');
                node.setAttribute('class', 'alert ' + cls);
                node.innerHTML = '<p>' + html + '</p>';
                statusEl.prepend(node);
            }

            function start() {
                if (source) source.close();
                clearStatus();
                graceful = false;
                launchEl.classList.add('is-disabled');
                addStatus('Initializing', 'is-warning');

                source = new EventSource('build?branch=' + encodeURIComponent(branchEl.value || 'main'));
                source.onerror = function() {
                    if (!graceful) addStatus('Connection lost, retrying', 'is-warning');
                };
                source.onmessage = function(e) {
                    var obj = JSON.parse(e.data);
                    addStatus(problemHtml(obj.value), levelClass(obj.level));
                };
                source.addEventListener('completed', function(e) {
                    var obj = JSON.parse(e.data);
                    addStatus('Done', 'is-success');
                    launchEl.setAttribute('href', obj.url);
                    launchEl.setAttribute('target', obj.frame);
                    launchEl.classList.remove('is-disabled');
                    source.close();
                });
                source.addEventListener('exception', function(e) {
                    addStatus(escHtml(e.data), 'is-danger');
                    source.close();
                });
                source.addEventListener('close', function() {
                    graceful = true;
                    source.close();
                });
                source.addEventListener('timeout', function() {
                    addStatus('Timeout', 'is-warning');
                });
            }

            document.getElementById('build-action').addEventListener('click', start);
        })();
    "#;

    Html(page_with_script(
        &format!("站点 {key}"),
        &body,
        script,
    ))
    .into_response()
}
