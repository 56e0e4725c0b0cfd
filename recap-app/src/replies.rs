//! User-facing reply strings, localized to the user's preference.
//!
//! `auto` resolves to English. Only consent and quota outcomes ever
//! produce a reply; internal failures stay silent.

use crate::model::{LangChoice, Plan};

fn resolve(lang: LangChoice) -> LangChoice {
    match lang {
        LangChoice::Auto => LangChoice::En,
        other => other,
    }
}

pub fn privacy_notice(lang: LangChoice) -> &'static str {
    match resolve(lang) {
        LangChoice::Ar => "مرحبا! هذه الخدمة تلخص الرسائل النصية. بمتابعة الاستخدام أنت توافق على شروط الخدمة وسياسة الخصوصية. أرسل STOP في أي وقت لإيقاف الخدمة.",
        LangChoice::Es => "¡Hola! Este servicio resume mensajes de texto. Al continuar aceptas los términos del servicio y la política de privacidad. Envía STOP en cualquier momento para darte de baja.",
        _ => "Hi! This service summarizes text messages. By continuing you agree to the terms of service and privacy policy. Send STOP at any time to opt out.",
    }
}

pub fn help(lang: LangChoice) -> String {
    let commands = "HELP, STATUS, PAY, STOP, START, DELETE, FEEDBACK, LANG <AUTO|EN|AR|ES>";
    match resolve(lang) {
        LangChoice::Ar => format!(
            "الأوامر المتاحة: {commands}\nاللغة الحالية: {}",
            lang.as_str()
        ),
        LangChoice::Es => format!(
            "Comandos disponibles: {commands}\nIdioma actual: {}",
            lang.as_str()
        ),
        _ => format!("Available commands: {commands}\nCurrent language: {}", lang.as_str()),
    }
}

pub fn status(lang: LangChoice, plan: Plan, free_remaining: i64) -> String {
    match resolve(lang) {
        LangChoice::Ar => format!(
            "الخطة: {}\nالملخصات المجانية المتبقية: {}\nاللغة: {}",
            plan.as_str(),
            free_remaining,
            lang.as_str()
        ),
        LangChoice::Es => format!(
            "Plan: {}\nResúmenes gratuitos restantes: {}\nIdioma: {}",
            plan.as_str(),
            free_remaining,
            lang.as_str()
        ),
        _ => format!(
            "Plan: {}\nFree summaries remaining: {}\nLanguage: {}",
            plan.as_str(),
            free_remaining,
            lang.as_str()
        ),
    }
}

pub fn pay(lang: LangChoice, checkout_url: &str) -> String {
    match resolve(lang) {
        LangChoice::Ar => format!("للاشتراك، افتح الرابط التالي:\n{checkout_url}"),
        LangChoice::Es => format!("Para suscribirte, abre este enlace:\n{checkout_url}"),
        _ => format!("To subscribe, open this link:\n{checkout_url}"),
    }
}

pub fn stop_confirm(lang: LangChoice) -> &'static str {
    match resolve(lang) {
        LangChoice::Ar => "تم إيقاف الخدمة. أرسل START لإعادة التفعيل.",
        LangChoice::Es => "Servicio pausado. Envía START para reactivarlo.",
        _ => "You are opted out. Send START to resume.",
    }
}

pub fn start_confirm(lang: LangChoice) -> &'static str {
    match resolve(lang) {
        LangChoice::Ar => "تمت إعادة تفعيل الخدمة.",
        LangChoice::Es => "Servicio reactivado.",
        _ => "You are opted back in.",
    }
}

pub fn delete_confirm(lang: LangChoice) -> &'static str {
    match resolve(lang) {
        LangChoice::Ar => "تم حذف تفضيلاتك وبيانات الاستخدام.",
        LangChoice::Es => "Tus preferencias y datos de uso fueron borrados.",
        _ => "Your preferences and usage data were erased.",
    }
}

pub fn feedback(lang: LangChoice) -> &'static str {
    match resolve(lang) {
        LangChoice::Ar => "نسعد بملاحظاتك! أرسلها إلى feedback@recap.example.com.",
        LangChoice::Es => "¡Nos encanta recibir comentarios! Escríbenos a feedback@recap.example.com.",
        _ => "We love feedback! Email us at feedback@recap.example.com.",
    }
}

pub fn lang_confirm(choice: LangChoice) -> String {
    // Language-neutral confirmation format.
    format!("LANG = {}", choice.as_str())
}

pub fn lang_invalid(lang: LangChoice, code: &str) -> String {
    match resolve(lang) {
        LangChoice::Ar => format!("اللغة غير مدعومة: {code}. الخيارات: AUTO, EN, AR, ES"),
        LangChoice::Es => format!("Idioma no soportado: {code}. Opciones: AUTO, EN, AR, ES"),
        _ => format!("Unsupported language: {code}. Options: AUTO, EN, AR, ES"),
    }
}

pub fn paywall(lang: LangChoice, checkout_url: &str) -> String {
    match resolve(lang) {
        LangChoice::Ar => format!(
            "انتهت ملخصاتك المجانية. للاستمرار بدون حدود اشترك هنا:\n{checkout_url}"
        ),
        LangChoice::Es => format!(
            "Se acabaron tus resúmenes gratuitos. Para continuar sin límites suscríbete aquí:\n{checkout_url}"
        ),
        _ => format!(
            "You've used all your free summaries. To continue without limits, subscribe here:\n{checkout_url}"
        ),
    }
}
