pub const INDEX_HTML: &str = r#"
<!doctype html>
<html lang="en" class="h-full dark">

<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Threat Vision Console</title>

  <link rel="preconnect" href="https://fonts.googleapis.com" />
  <link rel="preconnect" href="https://fonts.gstatic.com" crossorigin />
  <link href="https://fonts.googleapis.com/css2?family=Rajdhani:wght@500;600;700&display=swap" rel="stylesheet" />
  <style type="text/tailwindcss">
    @theme {
      --font-tactical: "Rajdhani", ui-sans-serif, system-ui;

      --color-console-bg: #050B16;
      --color-console-panel: #0A1628;
      --color-console-accent: #38bdf8;
      --color-console-danger: #fb7185;
      --color-console-success: #4ade80;

      --shadow-hud: 0 0 24px rgba(56, 189, 248, 0.18);
    }

    @layer base {
      html { @apply h-full; }
      body { @apply h-full bg-console-bg text-slate-100 font-[Rajdhani]; }
      [x-cloak] { display: none !important; }
    }

    @layer components {
      .mode-btn {
        @apply rounded-lg border border-slate-700 bg-console-panel px-4 py-2 text-sm font-semibold uppercase tracking-widest transition;
      }
      .mode-btn:hover { @apply border-console-accent text-console-accent; }
      .mode-btn[data-active="true"] { @apply border-console-accent bg-console-accent/15 text-console-accent shadow-hud; }
    }
  </style>
  <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  <script defer src="https://cdn.jsdelivr.net/npm/alpinejs@3.13.5/dist/cdn.min.js" crossorigin="anonymous"></script>
</head>

<body x-data="visionConsole()" x-init="init()" class="flex min-h-full flex-col items-center gap-6 p-6">
  <header class="flex w-full max-w-5xl items-center justify-between">
    <h1 class="text-2xl font-bold uppercase tracking-[0.3em] text-console-accent">Threat Vision</h1>
    <span class="text-sm uppercase tracking-widest text-slate-400" x-text="status"></span>
  </header>

  <div x-cloak x-show="alerting"
    class="w-full max-w-5xl rounded-lg border border-console-danger bg-console-danger/20 px-4 py-3 text-center text-lg font-bold uppercase tracking-[0.4em] text-console-danger">
    Alert <span class="text-sm tracking-widest" x-text="alertText"></span>
  </div>

  <nav class="flex flex-wrap justify-center gap-3">
    <template x-for="feed in feeds" :key="feed.mode">
      <button class="mode-btn" :data-active="active === feed.mode" @click="select(feed)" x-text="feed.title"></button>
    </template>
    <button class="mode-btn hover:border-console-danger hover:text-console-danger" @click="stop()">Stop</button>
  </nav>

  <main class="w-full max-w-5xl overflow-hidden rounded-xl border border-slate-800 bg-console-panel shadow-hud">
    <img x-show="src" :src="src" alt="Detection feed" class="block w-full" />
    <p x-show="!src" class="py-32 text-center uppercase tracking-widest text-slate-500">No feed selected</p>
  </main>

  <script>
    function visionConsole() {
      return {
        feeds: [
          { mode: "weapons", title: "Weapons", path: "/video_feed_weapons" },
          { mode: "masks", title: "Masks", path: "/video_feed_masks" },
          { mode: "weapons_and_masks", title: "Weapons + Masks", path: "/video_feed_weapons_and_masks" },
          { mode: "full_body", title: "Full Body", path: "/video_feed_full_body" },
        ],
        active: null,
        src: "",
        status: "idle",
        alerting: false,
        alertText: "",
        alertTimer: null,

        init() {
          const events = new EventSource("/alert_events");
          events.addEventListener("alert", (msg) => {
            const event = JSON.parse(msg.data);
            this.alertText = event.reasons.join(" / ").replaceAll("_", " ");
            this.alerting = true;
            clearTimeout(this.alertTimer);
            this.alertTimer = setTimeout(() => { this.alerting = false; }, 2000);
          });
          this.refresh();
        },

        select(feed) {
          this.active = feed.mode;
          this.src = feed.path + "?t=" + Date.now();
          this.status = feed.title;
        },

        async stop() {
          await fetch("/stop_detection");
          this.active = null;
          this.src = "";
          this.alerting = false;
          this.refresh();
        },

        async refresh() {
          try {
            const res = await fetch("/status");
            const status = await res.json();
            this.status = status.mode.replaceAll("_", " ");
          } catch (_) {
            this.status = "offline";
          }
        },
      };
    }
  </script>
</body>

</html>
"#;
