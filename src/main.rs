use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, NaiveTime, Weekday};
use clap::{Parser, Subcommand};
use school_booking::{
    BookingRequest, BookingStore, EquipmentRequest, EquipmentService, LogNotifier, MemoryStore,
    PgStore, RestStore, Room, RoomBookingService, RoomSchedule, Settings, SystemClock, Teacher,
    Timetable, Verification, config::AppConfig, models::AdvanceNotice, term_fingerprint,
    verification::short_fingerprint, verify,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

const DEMO_TEACHER: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);
const DEMO_UNIT: &str = "Objetivo Embaré";

#[derive(Parser, Debug)]
#[command(name = "school-booking")]
#[command(about = "Room and equipment booking for school units")]
struct Args {
    /// Run against seeded in-memory data instead of a real store
    #[arg(long, global = true)]
    demo: bool,

    /// Extra configuration file layered over the standard ones
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the rooms a teacher may book, grouped by unit
    Rooms {
        #[arg(long)]
        user: Uuid,
    },
    /// Check a room request without booking it
    Check {
        #[arg(long)]
        room: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
    },
    /// Book a room
    Book {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        room: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
    },
    /// Book a room every week until the end of the month
    Recurring {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        room: Uuid,
        #[arg(long)]
        weekday: Weekday,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
    },
    /// List a teacher's upcoming room bookings
    Bookings {
        #[arg(long)]
        user: Uuid,
    },
    /// Cancel one of a teacher's room bookings
    Cancel {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        booking: Uuid,
    },
    /// Verify a responsibility term by its QR token
    Verify { token: String },
    /// Show equipment stock for a time range
    Equipment {
        #[arg(long)]
        unit: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
    },
    /// Request equipment and sign the responsibility term
    Request {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        unit: String,
        /// Where the equipment will be used
        #[arg(long)]
        local: Option<String>,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        start: NaiveTime,
        #[arg(long)]
        end: NaiveTime,
        /// Item and quantity as `<equipment id>=<quantity>`, repeatable
        #[arg(long = "item", value_parser = parse_item, required = true)]
        items: Vec<(Uuid, u32)>,
        #[arg(long)]
        observations: Option<String>,
    },
    /// Write an example timetable CSV
    TimetableTemplate {
        #[arg(long, default_value = "modelo_horario.csv")]
        output: PathBuf,
    },
    /// Parse a timetable CSV and print it
    TimetableImport { file: PathBuf },
    /// Print the SHA-256 fingerprint of a term document
    Fingerprint { file: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("school_booking=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load_with_file(args.config.as_deref())
        .context("Failed to load configuration")?;
    let offset = config.booking.offset()?;
    let Args { demo, command, .. } = args;

    // Offline commands need no store.
    match &command {
        Command::TimetableTemplate { output } => {
            return write_template(&config.export.output_dir.join(output));
        }
        Command::TimetableImport { file } => return import_timetable(file),
        Command::Fingerprint { file } => return print_fingerprint(file),
        _ => {}
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async move {
        if demo {
            tracing::info!("Running against demo data");
            run(demo_store(&config), command, offset).await
        } else if let Some(url) = &config.database.url {
            tracing::info!("Connecting to database...");
            let store = PgStore::connect(url, config.booking.clone()).await?;
            tracing::info!("Database connected successfully");
            run(store, command, offset).await
        } else {
            let store = RestStore::new(&config.store, &config.network, config.booking.clone())?;
            tracing::info!("REST store initialized");
            run(store, command, offset).await
        }
    })
}

async fn run<S: BookingStore + Clone>(store: S, command: Command, offset: FixedOffset) -> Result<()> {
    let rooms = RoomBookingService::new(store.clone(), SystemClock, LogNotifier, offset);

    match command {
        Command::Rooms { user } => {
            let teacher = load_teacher(&store, user).await?;
            for (unit, list) in rooms.bookable_rooms(&teacher).await? {
                println!("{unit}");
                for room in list {
                    println!(
                        "  {}  {}  {} ({})",
                        room.id,
                        room.name,
                        room.schedule.describe_hours(),
                        room.schedule.describe_days()
                    );
                }
            }
        }
        Command::Check {
            room,
            date,
            start,
            end,
        } => {
            let request = BookingRequest::new(date, start, end);
            match rooms.evaluate(room, &request).await {
                Ok(room) => println!("{} disponível.", room.name),
                Err(e) => println!("{} [{}]", e.user_message(), e.code()),
            }
        }
        Command::Book {
            user,
            room,
            date,
            start,
            end,
        } => {
            let teacher = load_teacher(&store, user).await?;
            let request = BookingRequest::new(date, start, end);
            match rooms.book(&teacher, room, &request).await {
                Ok(booking) => println!("{}", booking.id),
                Err(e) => println!("{} [{}]", e.user_message(), e.code()),
            }
        }
        Command::Recurring {
            user,
            room,
            weekday,
            start,
            end,
        } => {
            let teacher = load_teacher(&store, user).await?;
            match rooms.book_recurring(&teacher, room, weekday, start, end).await {
                Ok(outcome) => {
                    for (date, result) in &outcome.occurrences {
                        match result {
                            Ok(_) => println!("{date}  ok"),
                            Err(e) => println!("{date}  {}", e.user_message()),
                        }
                    }
                }
                Err(e) => println!("{} [{}]", e.user_message(), e.code()),
            }
        }
        Command::Bookings { user } => {
            let teacher = load_teacher(&store, user).await?;
            for booking in rooms.my_bookings(&teacher).await? {
                let start = booking.interval.start.with_timezone(&offset);
                let end = booking.interval.end.with_timezone(&offset);
                println!(
                    "{}  {}  {}-{}  {}",
                    booking.id,
                    start.format("%d/%m/%Y"),
                    start.format("%H:%M"),
                    end.format("%H:%M"),
                    booking.status
                );
            }
        }
        Command::Cancel { user, booking } => {
            let teacher = load_teacher(&store, user).await?;
            if let Err(e) = rooms.cancel(&teacher, booking).await {
                println!("{} [{}]", e.user_message(), e.code());
            }
        }
        Command::Verify { token } => match verify(&store, &token, "school-booking-cli").await? {
            Verification::Valid(b) => {
                println!("Termo válido");
                println!("  Professor: {} ({})", b.teacher_name, b.registration);
                println!(
                    "  Data: {} {}-{}",
                    b.booking_date.format("%d/%m/%Y"),
                    b.start_time.format("%H:%M"),
                    b.end_time.format("%H:%M")
                );
                println!("  Status: {}", b.status);
            }
            Verification::Invalid => println!("Termo não encontrado ou inválido."),
        },
        Command::Equipment {
            unit,
            date,
            start,
            end,
        } => {
            let service = EquipmentService::new(store, SystemClock, offset);
            if let Err(rejection) = service.validate(&unit, date, start, end).await? {
                println!("{rejection} [{}]", rejection.code());
                return Ok(());
            }
            for item in service.availability(&unit, date, start, end).await? {
                println!(
                    "{}  {}  {}/{}",
                    item.id, item.name, item.available_quantity, item.total_quantity
                );
            }
        }
        Command::Request {
            user,
            unit,
            local,
            date,
            start,
            end,
            items,
            observations,
        } => {
            let teacher = load_teacher(&store, user).await?;
            let service = EquipmentService::new(store, SystemClock, offset);
            let request = EquipmentRequest {
                unit,
                local,
                date,
                start,
                end,
                items,
                observations,
            };
            match service.request(&teacher, &request, "school-booking-cli").await {
                Ok(signed) => {
                    println!("Termo #{}", signed.display_id);
                    println!("  Hash: {}", short_fingerprint(&signed.fingerprint));
                    if let Some(token) = signed.verification_token() {
                        println!("  Token: {token}");
                    }
                }
                Err(e) => println!("{} [{}]", e.user_message(), e.code()),
            }
        }
        Command::TimetableTemplate { .. }
        | Command::TimetableImport { .. }
        | Command::Fingerprint { .. } => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

fn parse_item(s: &str) -> Result<(Uuid, u32), String> {
    let (id, quantity) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <id>=<quantity>, got {s:?}"))?;
    let id = id.trim().parse().map_err(|e| format!("invalid equipment id: {e}"))?;
    let quantity = quantity
        .trim()
        .parse()
        .map_err(|e| format!("invalid quantity: {e}"))?;
    Ok((id, quantity))
}

async fn load_teacher<S: BookingStore>(store: &S, user: Uuid) -> Result<Teacher> {
    store
        .teacher(user)
        .await?
        .with_context(|| format!("Teacher {user} not found"))
}

fn write_template(path: &Path) -> Result<()> {
    let bytes = Timetable::template().to_csv()?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Timetable template written");
    Ok(())
}

fn import_timetable(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let table = Timetable::from_csv(&bytes)?;
    println!("{}", table.headers.join(" | "));
    for row in &table.rows {
        println!("{}", row.join(" | "));
    }
    Ok(())
}

fn print_fingerprint(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    println!("{}", term_fingerprint(&text));
    Ok(())
}

/// In-memory store with one unit, two rooms, a projector and a demo teacher.
fn demo_store(config: &AppConfig) -> MemoryStore {
    let store = MemoryStore::new();
    let weekdays = vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    store.add_teacher(Teacher {
        id: DEMO_TEACHER,
        full_name: "Professor Demo".to_string(),
        registration: "0001".to_string(),
        units: vec![DEMO_UNIT.to_string()],
        recurring_booking_enabled: true,
        recurring_booking_units: Vec::new(),
    });
    store.set_settings(Settings {
        room_booking_enabled: true,
        room_advance: AdvanceNotice::Disabled,
        equipment_advance: AdvanceNotice::MinHours(24),
        ..Settings::disabled(DEMO_UNIT)
    });

    for (n, name) in [(1u128, "Laboratório 1"), (2, "Sala de Vídeo")] {
        store.add_room(Room {
            id: Uuid::from_u128(0x1000 + n),
            name: name.to_string(),
            unit: DEMO_UNIT.to_string(),
            capacity: Some(40),
            description: None,
            schedule: RoomSchedule::new(
                config.booking.default_min_time,
                config.booking.default_max_time,
                weekdays.clone(),
            ),
            is_active: true,
        });
    }

    store.add_equipment(school_booking::Equipment {
        id: Uuid::from_u128(0x2001),
        unit: DEMO_UNIT.to_string(),
        name: "Projetor".to_string(),
        brand: None,
        model: None,
        total_quantity: 3,
    });

    tracing::debug!(teacher = %DEMO_TEACHER, "Demo data seeded");
    store
}
