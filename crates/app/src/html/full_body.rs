pub const FULL_BODY_HTML: &str = r#"
<!doctype html>
<html lang="en" class="h-full dark">

<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Full Body Detection</title>
  <style type="text/tailwindcss">
    @theme {
      --color-console-bg: #050B16;
      --color-console-panel: #0A1628;
      --color-console-accent: #38bdf8;
    }
  </style>
  <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
</head>

<body class="flex min-h-full flex-col items-center gap-6 bg-console-bg p-6 text-slate-100">
  <h1 class="text-2xl font-bold uppercase tracking-[0.3em] text-console-accent">Full Body Detection</h1>
  <main class="w-full max-w-5xl overflow-hidden rounded-xl border border-slate-800 bg-console-panel">
    <img id="feed" src="/video_feed_full_body" alt="Full body feed" class="block w-full" />
  </main>
  <div class="flex gap-3 text-sm uppercase tracking-widest">
    <a href="/" class="rounded-lg border border-slate-700 px-4 py-2 hover:border-console-accent">Back</a>
    <button id="stop" class="rounded-lg border border-slate-700 px-4 py-2 hover:border-rose-400">Stop</button>
  </div>
  <script>
    document.getElementById("stop").addEventListener("click", async () => {
      await fetch("/stop_detection");
      document.getElementById("feed").removeAttribute("src");
    });
  </script>
</body>

</html>
"#;
