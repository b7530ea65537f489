//! Landing page

/// Render the viewer page
///
/// The page shows `stream.mjpg` full-window, rotated by `rotation` degrees to
/// compensate for how the camera is mounted.
pub fn render_index(title: &str, rotation: u16) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body, html {{
  height: 100%;
  margin: 0;
  background-color: black;
  display: flex;
  justify-content: center;
  align-items: center;
}}
img {{
  max-width: 100%;
  max-height: 100%;
  transform: rotate({rotation}deg);
}}
</style>
</head>
<body>
<img src="stream.mjpg" alt="{title}">
</body>
</html>
"#
    )
}
