//! `screenshot` blocks.
//!
//! The block body is compiled into a puppeteer program that runs in a
//! separate browser process. The image lands in a temporary file next to
//! its destination and is moved into place only once the process exits
//! cleanly and the file reads back as a PNG.

mod png;
mod program;
mod script;

use std::fs;

use galley_mdx::{escape_attr, parse_args, Coercion, Field, Node};
use tokio::process::Command;

use crate::error::{ExecError, Result};
use crate::file::publish;
use crate::options::file_name;
use crate::process::{ensure_success, run_captured};
use crate::session::Session;

pub use png::dimensions;
pub use program::{
    render_program, Capture, Viewport, FULL_PAGE_VIEWPORT_HEIGHT, SCREENSHOT_PATH_ENV,
};
pub use script::{compile, Step};

#[cfg(test)]
pub(crate) use png::fixture as png_fixture;

pub const SCHEMA: &[Field] = &[
    Field::required("filename", Coercion::Str),
    Field::required("alt", Coercion::Str),
    Field::with_default("width", Coercion::Number, "1024"),
    Field::with_default("height", Coercion::Number, "0"),
    Field::with_default("x", Coercion::Number, "0"),
    Field::with_default("y", Coercion::Number, "0"),
    Field::with_default("retina", Coercion::Bool, "false"),
];

/// Options for a `screenshot` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotOptions {
    pub filename: String,
    pub alt: String,
    pub width: u32,
    /// 0 captures the full page
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub retina: bool,
    pub steps: Vec<Step>,
}

impl ScreenshotOptions {
    pub fn parse(args: &str, body: &str) -> Result<Self> {
        let args = parse_args(args, SCHEMA)?;

        let filename = file_name("filename", args.str("filename").unwrap_or_default())?;
        if !filename.ends_with(".png") || filename.len() == ".png".len() {
            return Err(ExecError::validation(format!(
                "field `filename` must name a .png file, got `{filename}`"
            )));
        }

        let width = args.uint("width")?.unwrap_or(1024);
        if width == 0 {
            return Err(ExecError::validation("field `width` must be greater than 0"));
        }
        let height = args.uint("height")?.unwrap_or(0);
        let x = args.uint("x")?.unwrap_or(0);
        let y = args.uint("y")?.unwrap_or(0);
        if height == 0 && (x != 0 || y != 0) {
            return Err(ExecError::precondition(format!(
                "fields `x` and `y` must be 0 for a full-page screenshot (height=0), got x={x} y={y}"
            )));
        }
        for (offset, extent, a, b) in [(x, width, "x", "width"), (y, height, "y", "height")] {
            if offset.checked_add(extent).is_none() {
                return Err(ExecError::validation(format!(
                    "fields `{a}` + `{b}` overflow the viewport, got {a}={offset} {b}={extent}"
                )));
            }
        }

        Ok(Self {
            filename,
            alt: args.str("alt").unwrap_or_default().to_string(),
            width,
            height,
            x,
            y,
            retina: args.flag("retina"),
            steps: compile(body)?,
        })
    }

    /// Filename as written to disk, `@2x` in retina mode.
    pub fn output_filename(&self) -> String {
        if !self.retina {
            return self.filename.clone();
        }
        let stem = self.filename.strip_suffix(".png").unwrap_or(&self.filename);
        format!("{stem}@2x.png")
    }

    pub fn viewport(&self) -> Viewport {
        let height = if self.height == 0 {
            FULL_PAGE_VIEWPORT_HEIGHT
        } else {
            self.y.saturating_add(self.height)
        };
        Viewport {
            width: self.x.saturating_add(self.width),
            height,
            scale: if self.retina { 2 } else { 1 },
        }
    }

    pub fn capture(&self) -> Capture {
        if self.height == 0 {
            return Capture::FullPage;
        }
        Capture::Clip {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    pub async fn run(&self, session: &mut Session) -> Result<Option<Node>> {
        let basename = session.basename()?.to_string();
        let dir = session.assets_root().join("screenshots").join(&basename);
        fs::create_dir_all(&dir).map_err(|e| {
            ExecError::resource(format!("cannot create {}: {e}", dir.display()))
        })?;

        let filename = self.output_filename();
        let target = dir.join(&filename);
        let tmp = tempfile::Builder::new()
            .prefix(".galley-")
            .suffix(".png")
            .tempfile_in(&dir)
            .map_err(|e| ExecError::io(&dir, e))?;

        let program = render_program(&self.steps, self.viewport(), self.capture());
        let browser = &session.options().browser;
        let mut cmd = Command::new(&browser.program);
        cmd.args(&browser.args)
            .current_dir(session.cwd())
            .env(SCREENSHOT_PATH_ENV, tmp.path())
            .kill_on_drop(true);

        let label = format!("screenshot {filename}");
        let output =
            run_captured(cmd, &label, Some(program.as_bytes()), Some(browser.timeout)).await?;
        ensure_success(&label, &output)?;

        let bytes = fs::read(tmp.path()).map_err(|e| ExecError::io(tmp.path(), e))?;
        let (width, height) = dimensions(&bytes)?;
        publish(tmp, &target, None)?;
        tracing::info!(path = %target.display(), width, height, "captured screenshot");

        let url = format!(
            "{}/{}/{}",
            session.options().screenshot_url_base.trim_end_matches('/'),
            basename,
            filename
        );
        let node = if self.retina {
            Node::html(format!(
                "<img src=\"{}\" alt=\"{}\" width=\"{}\" height=\"{}\">",
                escape_attr(&url),
                escape_attr(&self.alt),
                width / 2,
                height / 2
            ))
        } else {
            Node::image(url, self.alt.as_str())
        };

        Ok(Some(
            node.with_data("screenshot.path", target.to_string_lossy())
                .with_data("screenshot.width", width.to_string())
                .with_data("screenshot.height", height.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{BrowserConfig, SessionOptions};
    use galley_mdx::NodeKind;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::time::Duration;

    const BODY: &str = "visit http://localhost:3000\nwait #app\n";

    /// Session whose browser copies `fixture` to the screenshot path.
    fn fake_browser_session(root: &Path, script: &str) -> Session {
        let workdir = root.join("project");
        fs::create_dir_all(&workdir).unwrap();
        Session::new(SessionOptions {
            workdir,
            assets_root: root.join("assets"),
            basename: Some("intro".to_string()),
            browser: BrowserConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                timeout: Duration::from_secs(10),
            },
            ..Default::default()
        })
    }

    fn copying_browser(root: &Path, width: u32, height: u32) -> Session {
        let fixture = root.join("fixture.png");
        fs::write(&fixture, png::fixture(width, height)).unwrap();
        let script = format!(
            "cat > /dev/null; cp '{}' \"${SCREENSHOT_PATH_ENV}\"",
            fixture.display()
        );
        fake_browser_session(root, &script)
    }

    #[test]
    fn validates_fields() {
        assert!(ScreenshotOptions::parse("filename=a.jpg alt=x", BODY).is_err());
        assert!(ScreenshotOptions::parse("filename=../a.png alt=x", BODY).is_err());
        assert!(ScreenshotOptions::parse("filename=a.png alt=x width=0", BODY).is_err());
        assert!(ScreenshotOptions::parse("filename=a.png", BODY).is_err());
        assert!(
            ScreenshotOptions::parse("filename=a.png alt=x", "visit http://x\nscroll 10\n").is_err()
        );

        let opts = ScreenshotOptions::parse("filename=a.png alt=x", BODY).unwrap();
        assert_eq!((opts.width, opts.height), (1024, 0));
        assert_eq!(opts.capture(), Capture::FullPage);
    }

    #[test]
    fn full_page_rejects_offsets() {
        let err =
            ScreenshotOptions::parse("filename=a.png alt=x height=0 x=5", BODY).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("`x`") && msg.contains("`y`"), "{msg}");

        let opts =
            ScreenshotOptions::parse("filename=a.png alt=x height=300 x=5 y=10", BODY).unwrap();
        assert_eq!(
            opts.capture(),
            Capture::Clip {
                x: 5,
                y: 10,
                width: 1024,
                height: 300
            }
        );
    }

    #[test]
    fn overflowing_clip_is_rejected() {
        let err = ScreenshotOptions::parse(
            "filename=a.png alt=x x=4294967295 width=10 height=10",
            BODY,
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("`x`") && msg.contains("`width`"), "{msg}");

        let err = ScreenshotOptions::parse("filename=a.png alt=x y=4294967000 height=1000", BODY)
            .unwrap_err();
        assert!(matches!(err, ExecError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("`y`") && msg.contains("`height`"), "{msg}");

        let opts = ScreenshotOptions::parse(
            "filename=a.png alt=x x=20 y=30 width=100 height=50",
            BODY,
        )
        .unwrap();
        assert_eq!((opts.viewport().width, opts.viewport().height), (120, 80));
    }

    #[test]
    fn retina_doubles_scale_and_renames() {
        let opts = ScreenshotOptions::parse("filename=home.png alt=x retina", BODY).unwrap();
        assert_eq!(opts.output_filename(), "home@2x.png");
        assert_eq!(opts.viewport().scale, 2);

        let opts = ScreenshotOptions::parse("filename=home.png alt=x", BODY).unwrap();
        assert_eq!(opts.output_filename(), "home.png");
    }

    #[tokio::test]
    async fn writes_image_and_returns_image_node() {
        let root = tempfile::tempdir().unwrap();
        let mut session = copying_browser(root.path(), 80, 120);

        let opts =
            ScreenshotOptions::parse("filename=shot.png alt=\"Home page\" width=80", BODY).unwrap();
        let node = opts.run(&mut session).await.unwrap().unwrap();

        assert_eq!(
            node.kind,
            NodeKind::Image {
                url: "/screenshots/intro/shot.png".to_string(),
                alt: "Home page".to_string()
            }
        );
        let dir = root.path().join("assets/screenshots/intro");
        assert!(dir.join("shot.png").is_file());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        assert_eq!(node.data.get("screenshot.width").map(String::as_str), Some("80"));
    }

    #[tokio::test]
    async fn retina_emits_img_with_halved_dimensions() {
        let root = tempfile::tempdir().unwrap();
        let mut session = copying_browser(root.path(), 161, 90);

        let opts =
            ScreenshotOptions::parse("filename=shot.png alt=\"a \\\"quoted\\\" <b>\" retina", BODY)
                .unwrap();
        let node = opts.run(&mut session).await.unwrap().unwrap();

        assert_eq!(
            node.kind,
            NodeKind::Html(
                "<img src=\"/screenshots/intro/shot@2x.png\" alt=\"a &quot;quoted&quot; &lt;b&gt;\" width=\"80\" height=\"45\">".to_string()
            )
        );
        assert!(root.path().join("assets/screenshots/intro/shot@2x.png").is_file());
    }

    #[tokio::test]
    async fn browser_receives_program_on_stdin() {
        let root = tempfile::tempdir().unwrap();
        let fixture = root.path().join("fixture.png");
        fs::write(&fixture, png::fixture(10, 10)).unwrap();
        let capture = root.path().join("program.js");
        let script = format!(
            "cat > '{}'; cp '{}' \"${SCREENSHOT_PATH_ENV}\"",
            capture.display(),
            fixture.display()
        );
        let mut session = fake_browser_session(root.path(), &script);

        ScreenshotOptions::parse("filename=a.png alt=x", BODY)
            .unwrap()
            .run(&mut session)
            .await
            .unwrap();

        let program = fs::read_to_string(capture).unwrap();
        assert!(program.contains("page.waitForSelector(\"#app\")"));
    }

    #[tokio::test]
    async fn failed_browser_leaves_no_image() {
        let root = tempfile::tempdir().unwrap();
        let mut session = fake_browser_session(root.path(), "cat > /dev/null; echo boom; exit 3");

        let err = ScreenshotOptions::parse("filename=a.png alt=x", BODY)
            .unwrap()
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Execution { ref output, .. } if output.contains("boom")));
        let dir = root.path().join("assets/screenshots/intro");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn invalid_png_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut session = fake_browser_session(
            root.path(),
            &format!("cat > /dev/null; echo nope > \"${SCREENSHOT_PATH_ENV}\""),
        );

        let err = ScreenshotOptions::parse("filename=a.png alt=x", BODY)
            .unwrap()
            .run(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Resource(_)));
        assert!(!root.path().join("assets/screenshots/intro/a.png").exists());
    }

    #[tokio::test]
    async fn requires_basename() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::new(SessionOptions {
            workdir: root.path().to_path_buf(),
            assets_root: root.path().join("assets"),
            ..Default::default()
        });

        let err = ScreenshotOptions::parse("filename=a.png alt=x", BODY)
            .unwrap()
            .run(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Resource(_)));
    }
}
