// src/browser/antidetect.rs
//
// Catalog of anti-detection JavaScript patches (spec.md §4.6) applied to
// every new context before any navigation happens, via
// `ContextOptions::init_scripts`. Each function returns one self-contained
// patch; `init_script::build` concatenates the set this persona needs, the
// same way `workers/cot.rs` treats its pattern table as a versioned,
// individually test-covered artifact rather than one opaque blob.

/// Overrides `navigator.webdriver`, which is the single most-checked
/// automation signal; CDP-driven Chrome sets this true by default.
pub fn patch_webdriver_flag() -> String {
    r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
"#
    .trim()
    .to_string()
}

/// Headless Chrome historically reported an empty `navigator.plugins`; a
/// real browser never does. `navigator.language`/`languages` are forced to
/// the context's configured locale rather than left at whatever the host
/// machine reports, so they never disagree with `Intl`/`Accept-Language`.
pub fn patch_plugins_and_languages(locale: &str) -> String {
    let primary = locale.split('-').next().unwrap_or(locale);
    format!(
        r#"
Object.defineProperty(navigator, 'plugins', {{
  get: () => [1, 2, 3, 4, 5].map(() => ({{ name: 'Chrome PDF Plugin' }})),
}});
Object.defineProperty(navigator, 'language', {{ get: () => '{locale}' }});
Object.defineProperty(navigator, 'languages', {{ get: () => ['{locale}', '{primary}'] }});
"#
    )
    .trim()
    .to_string()
}

/// Chrome's `window.chrome` object is absent under some automation stacks;
/// its absence, or a bare `{{runtime:{{}}}}` shell missing `csi`/`loadTimes`,
/// is itself a fingerprinting signal.
pub fn patch_chrome_runtime() -> String {
    r#"
if (!window.chrome) {
  window.chrome = {};
}
window.chrome.runtime = window.chrome.runtime || {};
window.chrome.csi = window.chrome.csi || function() {
  return { onloadT: Date.now(), startE: Date.now(), pageT: 0, tran: 15 };
};
window.chrome.loadTimes = window.chrome.loadTimes || function() {
  return { requestTime: Date.now() / 1000, startLoadTime: Date.now() / 1000 };
};
"#
    .trim()
    .to_string()
}

/// Spoofs `Notification.permission` away from the automation-default
/// "denied" that stock headless Chrome reports.
pub fn patch_permissions_query() -> String {
    r#"
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
  parameters.name === 'notifications'
    ? Promise.resolve({ state: Notification.permission })
    : originalQuery(parameters)
);
"#
    .trim()
    .to_string()
}

/// WebGL vendor/renderer strings leak the headless software rasterizer
/// ("Google SwiftShader"); report a plausible discrete GPU instead. Numeric
/// parameters (precision ranges, max texture size, etc.) get a touch of
/// session noise so two sessions reporting the same GPU string don't also
/// report byte-identical numeric parameters.
pub fn patch_webgl_vendor(vendor: &str, renderer: &str, noise_seed: u32) -> String {
    format!(
        r#"
const getParameter = WebGLRenderingContext.prototype.getParameter;
const __webglNoise = (({noise_seed} % 7) - 3) * 0.001;
WebGLRenderingContext.prototype.getParameter = function(parameter) {{
  if (parameter === 37445) return '{vendor}';
  if (parameter === 37446) return '{renderer}';
  const value = getParameter.call(this, parameter);
  if (typeof value === 'number' && Number.isFinite(value)) {{
    return value * (1 + __webglNoise);
  }}
  return value;
}};
"#
    )
    .trim()
    .to_string()
}

/// Hides the automation-only `cdc_` properties some CDP clients leave on
/// `document`.
pub fn patch_cdc_properties() -> String {
    r#"
for (const key of Object.keys(document)) {
  if (key.startsWith('cdc_')) {
    delete document[key];
  }
}
"#
    .trim()
    .to_string()
}

/// Canvas fingerprinting reads back pixel data via `getImageData`/
/// `toDataURL`; adding imperceptible, per-session-stable noise to the last
/// bit of each channel defeats exact-hash matching without visibly
/// corrupting anything drawn on screen.
pub fn patch_canvas_noise(noise_seed: u32) -> String {
    format!(
        r#"
(function() {{
  const seed = {noise_seed} >>> 0;
  function noiseAt(i) {{ return ((seed + i * 2654435761) >>> 0) % 3 - 1; }}
  const origGetImageData = CanvasRenderingContext2D.prototype.getImageData;
  CanvasRenderingContext2D.prototype.getImageData = function(...args) {{
    const data = origGetImageData.apply(this, args);
    for (let i = 0; i < data.data.length; i += 4) {{
      data.data[i] = Math.min(255, Math.max(0, data.data[i] + noiseAt(i)));
    }}
    return data;
  }};
  const origToDataURL = HTMLCanvasElement.prototype.toDataURL;
  HTMLCanvasElement.prototype.toDataURL = function(...args) {{
    const ctx = this.getContext('2d');
    if (ctx) {{
      const data = ctx.getImageData(0, 0, this.width, this.height);
      ctx.putImageData(data, 0, 0);
    }}
    return origToDataURL.apply(this, args);
  }};
}})();
"#
    )
    .trim()
    .to_string()
}

/// Audio-fingerprinting libraries read `AnalyserNode.getFloatFrequencyData`;
/// light, session-stable noise defeats exact matching the same way the
/// canvas patch does.
pub fn patch_audio_noise(noise_seed: u32) -> String {
    format!(
        r#"
(function() {{
  const seed = {noise_seed} >>> 0;
  const origGetFloatFrequencyData = AnalyserNode.prototype.getFloatFrequencyData;
  AnalyserNode.prototype.getFloatFrequencyData = function(array) {{
    origGetFloatFrequencyData.call(this, array);
    for (let i = 0; i < array.length; i++) {{
      array[i] += (((seed + i) % 7) - 3) * 0.0001;
    }}
  }};
}})();
"#
    )
    .trim()
    .to_string()
}

/// `navigator.hardwareConcurrency`/`deviceMemory` are normalized to a small
/// discrete set of plausible values rather than left at whatever the host
/// machine actually reports (a 32-core CI runner is itself a signal).
pub fn patch_hardware_profile(hardware_concurrency: u32, device_memory_gb: u32) -> String {
    format!(
        r#"
Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {hardware_concurrency} }});
Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {device_memory_gb} }});
"#
    )
    .trim()
    .to_string()
}

/// `RTCPeerConnection` ICE candidates can leak the host's real LAN/public IP
/// even behind a configured proxy; filter candidates down to `relay`/`srflx`
/// types gathered through the proxy rather than raw host candidates.
pub fn patch_rtc_ice_filtering() -> String {
    r#"
(function() {
  const OriginalRTCPeerConnection = window.RTCPeerConnection;
  if (!OriginalRTCPeerConnection) return;
  window.RTCPeerConnection = function(...args) {
    const pc = new OriginalRTCPeerConnection(...args);
    const origAddEventListener = pc.addEventListener.bind(pc);
    pc.addEventListener = function(type, listener, ...rest) {
      if (type !== 'icecandidate') {
        return origAddEventListener(type, listener, ...rest);
      }
      const wrapped = (event) => {
        if (event.candidate && /typ host/.test(event.candidate.candidate)) {
          return;
        }
        listener(event);
      };
      return origAddEventListener(type, wrapped, ...rest);
    };
    return pc;
  };
  window.RTCPeerConnection.prototype = OriginalRTCPeerConnection.prototype;
})();
"#
    .trim()
    .to_string()
}

/// `navigator.getBattery()` on a real laptop almost always reports
/// "charging, nearly full"; headless environments either lack the API or
/// report implausible values.
pub fn patch_get_battery() -> String {
    r#"
navigator.getBattery = () => Promise.resolve({
  charging: true,
  level: 0.97,
  chargingTime: 0,
  dischargingTime: Infinity,
  addEventListener: () => {},
  removeEventListener: () => {},
});
"#
    .trim()
    .to_string()
}

/// Forces `Intl.DateTimeFormat().resolvedOptions().timeZone` and
/// `Date.prototype.getTimezoneOffset` to the context's configured IANA
/// timezone, so the reported timezone never disagrees with the Accept-
/// Language/locale the rest of the fingerprint presents.
pub fn patch_timezone(timezone: &str) -> String {
    format!(
        r#"
(function() {{
  const tz = '{timezone}';
  const OriginalDateTimeFormat = Intl.DateTimeFormat;
  Intl.DateTimeFormat = function(locales, options) {{
    options = options || {{}};
    if (!options.timeZone) options.timeZone = tz;
    return new OriginalDateTimeFormat(locales, options);
  }};
  Intl.DateTimeFormat.prototype = OriginalDateTimeFormat.prototype;
  Intl.DateTimeFormat.supportedLocalesOf = OriginalDateTimeFormat.supportedLocalesOf;
  Date.prototype.getTimezoneOffset = function() {{
    const utc = new Date(this.toLocaleString('en-US', {{ timeZone: 'UTC' }}));
    const local = new Date(this.toLocaleString('en-US', {{ timeZone: tz }}));
    return (utc.getTime() - local.getTime()) / 60000;
  }};
}})();
"#
    )
    .trim()
    .to_string()
}

/// `performance.now()`/`Date.now()` report sub-millisecond jitter rather
/// than the perfectly monotonic, unnaturally clean values a scripted
/// automation clock tends to produce.
pub fn patch_timing_jitter(noise_seed: u32) -> String {
    format!(
        r#"
(function() {{
  const seed = {noise_seed} >>> 0;
  let counter = 0;
  function jitter() {{ counter += 1; return (((seed + counter) % 5) - 2) * 0.01; }}
  const origNow = performance.now.bind(performance);
  performance.now = () => origNow() + jitter();
  const origDateNow = Date.now;
  Date.now = () => origDateNow() + Math.round(jitter());
}})();
"#
    )
    .trim()
    .to_string()
}

/// Scrubs automation-driver identifiers (CDP endpoints, driver binary paths)
/// out of `Error.prototype.stack` strings, which some fingerprinting scripts
/// throw deliberately just to inspect.
pub fn patch_error_stack_scrub() -> String {
    r#"
(function() {
  const markers = ['puppeteer', 'playwright', 'webdriver', 'devtools://', 'chrome-extension://internal'];
  const descriptor = Object.getOwnPropertyDescriptor(Error.prototype, 'stack');
  if (!descriptor) return;
  Object.defineProperty(Error.prototype, 'stack', {
    get() {
      let value = descriptor.get ? descriptor.get.call(this) : this.__stack;
      if (typeof value === 'string') {
        for (const marker of markers) {
          if (value.toLowerCase().includes(marker)) {
            value = value.split('\n').filter((line) => !line.toLowerCase().includes(marker)).join('\n');
          }
        }
      }
      return value;
    },
    set(value) {
      this.__stack = value;
    },
    configurable: true,
  });
})();
"#
    .trim()
    .to_string()
}

/// Keeps `screen.*`, `window.outerWidth/Height`, `devicePixelRatio`, and
/// `matchMedia` consistent with the viewport this context was actually
/// opened with, rather than leaving them at whatever the real display
/// reports.
pub fn patch_screen_consistency(width: u32, height: u32, device_pixel_ratio: f64) -> String {
    format!(
        r#"
Object.defineProperty(window, 'outerWidth', {{ get: () => {width} }});
Object.defineProperty(window, 'outerHeight', {{ get: () => {height} }});
Object.defineProperty(window, 'devicePixelRatio', {{ get: () => {device_pixel_ratio} }});
Object.defineProperty(screen, 'width', {{ get: () => {width} }});
Object.defineProperty(screen, 'height', {{ get: () => {height} }});
Object.defineProperty(screen, 'availWidth', {{ get: () => {width} }});
Object.defineProperty(screen, 'availHeight', {{ get: () => {height} }});
const originalMatchMedia = window.matchMedia;
window.matchMedia = function(query) {{
  const result = originalMatchMedia.call(window, query);
  if (query.includes('resolution') || query.includes('device-pixel-ratio')) {{
    Object.defineProperty(result, 'matches', {{ value: true }});
  }}
  return result;
}};
"#
    )
    .trim()
    .to_string()
}

/// The "medium" variant (spec.md §4.6): lighter set applied on top of the
/// base patches for pages known to host anti-debugger scripts, rather than
/// always-on for every page.
pub fn patch_medium_variant() -> String {
    r#"
(function() {
  const OriginalFunction = Function;
  window.Function = new Proxy(OriginalFunction, {
    construct(target, args) {
      const body = args[args.length - 1];
      if (typeof body === 'string' && body.includes('debugger')) {
        args[args.length - 1] = body.replace(/debugger\s*;?/g, '');
      }
      return Reflect.construct(target, args);
    },
  });
  window.Function.prototype = OriginalFunction.prototype;

  const nativeToString = OriginalFunction.prototype.toString;
  OriginalFunction.prototype.toString = function() {
    const source = nativeToString.call(this);
    if (source.includes('[native code]')) return source;
    return `function ${this.name || ''}() { [native code] }`;
  };

  try {
    Object.defineProperty(window, 'self', { get: () => window.top });
  } catch (e) {
    // window.self is non-configurable in some engines; best effort only.
  }

  if (window.performance && window.performance.timing) {
    const timing = window.performance.timing;
    const now = Date.now();
    for (const key of Object.keys(timing)) {
      if (typeof timing[key] === 'number' && timing[key] > 0) {
        Object.defineProperty(timing, key, { value: now, configurable: true });
      }
    }
  }
})();
"#
    .trim()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_base_patch_is_nonempty_and_self_contained() {
        for patch in [
            patch_webdriver_flag(),
            patch_plugins_and_languages("en-GB"),
            patch_chrome_runtime(),
            patch_permissions_query(),
            patch_webgl_vendor("Intel Inc.", "Intel Iris OpenGL Engine", 7),
            patch_cdc_properties(),
            patch_canvas_noise(42),
            patch_audio_noise(42),
            patch_hardware_profile(8, 16),
            patch_rtc_ice_filtering(),
            patch_get_battery(),
            patch_timezone("America/Chicago"),
            patch_timing_jitter(42),
            patch_error_stack_scrub(),
            patch_screen_consistency(1920, 1080, 1.0),
            patch_medium_variant(),
        ] {
            assert!(!patch.trim().is_empty());
        }
    }

    #[test]
    fn webgl_vendor_patch_embeds_given_strings() {
        let patch = patch_webgl_vendor("NVIDIA Corporation", "NVIDIA GeForce RTX", 3);
        assert!(patch.contains("NVIDIA Corporation"));
        assert!(patch.contains("NVIDIA GeForce RTX"));
    }

    #[test]
    fn plugins_patch_forces_configured_locale() {
        let patch = patch_plugins_and_languages("fr-CA");
        assert!(patch.contains("'fr-CA'"));
        assert!(patch.contains("'fr'"));
    }

    #[test]
    fn chrome_runtime_patch_covers_csi_and_load_times() {
        let patch = patch_chrome_runtime();
        assert!(patch.contains("csi"));
        assert!(patch.contains("loadTimes"));
    }

    #[test]
    fn hardware_profile_embeds_given_values() {
        let patch = patch_hardware_profile(6, 8);
        assert!(patch.contains("hardwareConcurrency"));
        assert!(patch.contains('6'));
        assert!(patch.contains("deviceMemory"));
        assert!(patch.contains('8'));
    }

    #[test]
    fn timezone_patch_embeds_given_zone() {
        let patch = patch_timezone("Europe/London");
        assert!(patch.contains("Europe/London"));
    }

    #[test]
    fn screen_consistency_patch_embeds_given_dimensions() {
        let patch = patch_screen_consistency(412, 915, 3.0);
        assert!(patch.contains("412"));
        assert!(patch.contains("915"));
    }

    #[test]
    fn medium_variant_strips_debugger_and_forces_self_eq_top() {
        let patch = patch_medium_variant();
        assert!(patch.contains("debugger"));
        assert!(patch.contains("window.self"));
        assert!(patch.contains("performance.timing") || patch.contains("timing"));
    }
}
