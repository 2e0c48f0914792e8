//! Generation of the puppeteer program run by the browser process.

use std::fmt::Write;

use serde_json::Value;

use super::script::Step;

/// Environment variable carrying the path the program must write to.
pub const SCREENSHOT_PATH_ENV: &str = "GALLEY_SCREENSHOT_PATH";

/// Viewport height used for full-page captures.
pub const FULL_PAGE_VIEWPORT_HEIGHT: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

/// What part of the page ends up in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    FullPage,
    Clip {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Render the program for `steps`.
///
/// Any rejected promise ends the process with exit code 1, which the
/// caller reports as a failed block.
pub fn render_program(steps: &[Step], viewport: Viewport, capture: Capture) -> String {
    let mut js = String::new();

    js.push_str("const puppeteer = require('puppeteer');\n\n");
    js.push_str("(async () => {\n");
    js.push_str("  const browser = await puppeteer.launch();\n");
    js.push_str("  try {\n");
    js.push_str("    const page = await browser.newPage();\n");
    let _ = writeln!(
        js,
        "    await page.setViewport({{ width: {}, height: {}, deviceScaleFactor: {} }});",
        viewport.width, viewport.height, viewport.scale
    );

    for step in steps {
        match step {
            Step::Visit(url) => {
                let _ = writeln!(
                    js,
                    "    await page.goto({}, {{ waitUntil: 'networkidle0' }});",
                    js_string(url)
                );
            }
            Step::Wait(selector) => {
                let _ = writeln!(js, "    await page.waitForSelector({});", js_string(selector));
            }
        }
    }

    js.push_str(
        "    await page.evaluate(() => Promise.all(Array.from(document.images, (img) => {\n\
         \x20     if (img.complete) {\n\
         \x20       return img.naturalWidth > 0 ? null : Promise.reject(new Error(`image failed to load: ${img.src}`));\n\
         \x20     }\n\
         \x20     return new Promise((resolve, reject) => {\n\
         \x20       img.addEventListener('load', resolve);\n\
         \x20       img.addEventListener('error', () => reject(new Error(`image failed to load: ${img.src}`)));\n\
         \x20     });\n\
         \x20   })));\n",
    );

    let _ = writeln!(js, "    const path = process.env.{SCREENSHOT_PATH_ENV};");
    match capture {
        Capture::FullPage => {
            js.push_str("    await page.screenshot({ path, type: 'png', fullPage: true });\n");
        }
        Capture::Clip { x, y, width, height } => {
            let _ = writeln!(
                js,
                "    await page.screenshot({{ path, type: 'png', clip: {{ x: {x}, y: {y}, width: {width}, height: {height} }} }});"
            );
        }
    }

    js.push_str("  } finally {\n");
    js.push_str("    await browser.close();\n");
    js.push_str("  }\n");
    js.push_str("})().catch((err) => {\n");
    js.push_str("  console.error(err);\n");
    js.push_str("  process.exit(1);\n");
    js.push_str("});\n");

    js
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Viewport = Viewport {
        width: 800,
        height: FULL_PAGE_VIEWPORT_HEIGHT,
        scale: 1,
    };

    #[test]
    fn renders_steps_in_order() {
        let steps = vec![
            Step::Visit("http://localhost:3000".into()),
            Step::Wait("#app".into()),
        ];
        let js = render_program(&steps, VIEWPORT, Capture::FullPage);

        let visit = js
            .find("page.goto(\"http://localhost:3000\", { waitUntil: 'networkidle0' })")
            .unwrap();
        let wait = js.find("page.waitForSelector(\"#app\")").unwrap();
        let images = js.find("document.images").unwrap();
        let shot = js.find("fullPage: true").unwrap();
        assert!(visit < wait && wait < images && images < shot);
        assert!(js.contains("width: 800, height: 800, deviceScaleFactor: 1"));
        assert!(js.contains("process.exit(1)"));
    }

    #[test]
    fn escapes_script_arguments() {
        let steps = vec![Step::Visit("http://x/\"); process.exit(0); (\"".into())];
        let js = render_program(&steps, VIEWPORT, Capture::FullPage);
        assert!(js.contains(r#"page.goto("http://x/\"); process.exit(0); (\"""#));
    }

    #[test]
    fn renders_clip_region() {
        let steps = vec![Step::Visit("http://x".into())];
        let viewport = Viewport {
            width: 640,
            height: 480,
            scale: 2,
        };
        let capture = Capture::Clip {
            x: 10,
            y: 20,
            width: 640,
            height: 480,
        };
        let js = render_program(&steps, viewport, capture);

        assert!(js.contains("clip: { x: 10, y: 20, width: 640, height: 480 }"));
        assert!(js.contains("deviceScaleFactor: 2"));
        assert!(!js.contains("fullPage"));
    }
}
