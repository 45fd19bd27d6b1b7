//! Single-page browser UI served on every path the API does not claim.

use axum::response::Html;
use easel_core::{FieldRange, EXAMPLE_PROMPTS, GUIDANCE_SCALE, HEIGHT, INFERENCE_STEPS, WIDTH};

const PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>AI Image Generator</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 1100px; margin: 2rem auto; padding: 0 1rem; }
  .row { display: flex; gap: 1.5rem; flex-wrap: wrap; }
  .col { flex: 1; min-width: 280px; }
  textarea, input[type=range] { width: 100%; }
  label { display: block; margin-top: .8rem; font-weight: 600; }
  small { color: #666; }
  button { margin: 1rem .5rem 0 0; padding: .6rem 1.2rem; font-size: 1rem; }
  #image { max-width: 100%; max-height: 512px; border: 1px solid #ddd; }
  .example { margin: .2rem; padding: .3rem .6rem; font-size: .85rem; }
</style>
</head>
<body>
<h1>🎨 AI Image Generator</h1>
<p>Generate stunning images from text descriptions using Stable Diffusion v1.5</p>
<div class="row">
  <div class="col" style="flex: 2">
    <label for="prompt">Prompt</label>
    <small>Describe the image you want to generate</small>
    <textarea id="prompt" rows="3" placeholder="Enter your image description here..."></textarea>
    <label for="negative_prompt">Negative Prompt (Optional)</label>
    <small>Describe elements to avoid in the generation</small>
    <textarea id="negative_prompt" rows="2" placeholder="What you DON'T want in the image..."></textarea>
  </div>
  <div class="col">
    <details>
      <summary>Advanced Settings</summary>
@SLIDERS@
    </details>
  </div>
</div>
<button id="generate">🎨 Generate Image</button>
<button id="clear">🗑️ Clear Model</button>
<div class="row">
  <div class="col"><img id="image" alt="Generated Image"></div>
  <div class="col">
    <label for="status">Status</label>
    <textarea id="status" rows="2" readonly></textarea>
  </div>
</div>
<h3>Example Prompts</h3>
<div>
@EXAMPLES@
</div>
<script>
  const $ = (id) => document.getElementById(id);
  document.querySelectorAll('input[type=range]').forEach((input) => {
    const out = $(input.id + '_value');
    input.addEventListener('input', () => { out.textContent = input.value; });
  });
  document.querySelectorAll('.example').forEach((button) => {
    button.addEventListener('click', () => { $('prompt').value = button.textContent; });
  });

  async function post(path, body) {
    const response = await fetch(path, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {}),
    });
    const payload = await response.json();
    if (!response.ok) {
      throw new Error(payload.error ? payload.error.message : response.statusText);
    }
    return payload;
  }

  $('generate').addEventListener('click', async () => {
    $('generate').disabled = true;
    $('status').value = 'Generating...';
    try {
      const result = await post('/api/generate', {
        prompt: $('prompt').value,
        negative_prompt: $('negative_prompt').value,
        guidance_scale: parseFloat($('guidance_scale').value),
        inference_steps: parseInt($('inference_steps').value, 10),
        width: parseInt($('width').value, 10),
        height: parseInt($('height').value, 10),
      });
      if (result.image) {
        $('image').src = 'data:image/png;base64,' + result.image;
      } else {
        $('image').removeAttribute('src');
      }
      $('status').value = result.message;
    } catch (err) {
      $('status').value = '❌ ' + err.message;
    } finally {
      $('generate').disabled = false;
    }
  });

  $('clear').addEventListener('click', async () => {
    try {
      $('status').value = (await post('/api/clear')).message;
    } catch (err) {
      $('status').value = '❌ ' + err.message;
    }
  });
</script>
</body>
</html>
"#;

fn slider(id: &str, label: &str, info: &str, range: FieldRange) -> String {
    format!(
        r#"      <label for="{id}">{label}: <span id="{id}_value">{default}</span></label>
      <small>{info}</small>
      <input type="range" id="{id}" min="{min}" max="{max}" step="{step}" value="{default}">
"#,
        default = range.default,
        min = range.min,
        max = range.max,
        step = range.step,
    )
}

pub fn render() -> String {
    let sliders = [
        slider(
            "guidance_scale",
            "Guidance Scale",
            "How closely to follow the prompt (higher = more strict)",
            GUIDANCE_SCALE,
        ),
        slider(
            "inference_steps",
            "Inference Steps",
            "Number of denoising steps (more = higher quality, slower)",
            INFERENCE_STEPS,
        ),
        slider("width", "Width", "Image width in pixels", WIDTH),
        slider("height", "Height", "Image height in pixels", HEIGHT),
    ]
    .concat();
    let examples = EXAMPLE_PROMPTS
        .iter()
        .map(|prompt| format!(r#"  <button class="example">{prompt}</button>"#))
        .collect::<Vec<_>>()
        .join("\n");

    PAGE.replace("@SLIDERS@", &sliders)
        .replace("@EXAMPLES@", &examples)
}

pub async fn index() -> Html<String> {
    Html(render())
}
